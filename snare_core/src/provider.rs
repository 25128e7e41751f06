use thiserror::Error;

/// Largest integer the fixed-width range path accepts as an upper bound.
pub const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;
/// Number of bytes the fixed-width integral path may read for one value.
pub const MAX_FIXED_WIDTH_BYTES: usize = 6;
const MAX_SIGNED_BIG_BYTES: usize = 16;
const MAX_UNSIGNED_BIG_BYTES: usize = 15;
const FLOAT_MAX: f64 = f32::MAX as f64;

/// Errors raised for malformed decoder parameters.
///
/// Running out of input is never an error: every `consume_*` method degrades to
/// a deterministic fallback value instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("min must be less than or equal to max (min: {min}, max: {max})")]
    InvalidRange { min: i128, max: i128 },

    #[error("min must be less than or equal to max (min: {min}, max: {max})")]
    InvalidFloatRange { min: f64, max: f64 },

    #[error(
        "{requested} bytes requested but at most {max} can be read by the fixed-width path: use the corresponding big integral function instead"
    )]
    TooManyBytes { requested: usize, max: usize },

    #[error("max {max} is too large: use the corresponding big integral function instead")]
    ValueTooLarge { max: i64 },

    #[error("{requested} bytes requested but at most {max} fit the big integral accumulator")]
    BigIntegralTooWide { requested: usize, max: usize },

    #[error("provided collection is empty")]
    EmptyCollection,

    #[error("cannot pick {requested} elements from a collection of {available}")]
    TooManyElements { requested: usize, available: usize },
}

/// Text encodings understood by [`FuzzedDataProvider::consume_string`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    /// Every byte masked to 7 bits.
    #[default]
    Ascii,
    /// Every byte mapped to the code point of the same value.
    Latin1,
    /// UTF-8, invalid sequences replaced with U+FFFD.
    Utf8,
    /// UTF-16 little endian; a trailing odd byte is dropped.
    Utf16Le,
    /// Lowercase hexadecimal digits, two per byte.
    Hex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Front,
    Back,
}

/// Turns one fuzzer input into structured values.
///
/// Scalars (booleans, integrals, floats, picks) are read from the back of the
/// buffer in little-endian order. Arrays, byte blocks and strings are read from
/// the front in big-endian order. Fuzzers mutate the front of an input far more
/// often than its tail, so control values stay stable while bulk data changes.
///
/// One provider is built per fuzz iteration and is never shared.
#[derive(Debug, Clone)]
pub struct FuzzedDataProvider<'a> {
    data: &'a [u8],
    data_ptr: usize,
    remaining_bytes: usize,
}

impl<'a> FuzzedDataProvider<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            data_ptr: 0,
            remaining_bytes: data.len(),
        }
    }

    /// Returns the number of bytes that have not been consumed yet.
    pub fn remaining_bytes(&self) -> usize {
        self.remaining_bytes
    }

    fn next_byte(&mut self, end: End) -> Option<u8> {
        if self.remaining_bytes == 0 {
            return None;
        }
        self.remaining_bytes -= 1;
        match end {
            End::Back => Some(self.data[self.data_ptr + self.remaining_bytes]),
            End::Front => {
                let byte = self.data[self.data_ptr];
                self.data_ptr += 1;
                Some(byte)
            }
        }
    }

    /// Reads up to `n_bytes` bytes; the first byte read is the most significant one.
    fn accumulate(&mut self, n_bytes: usize, end: End) -> u128 {
        let mut value: u128 = 0;
        for _ in 0..n_bytes {
            match self.next_byte(end) {
                Some(byte) => value = (value << 8) | u128::from(byte),
                None => break,
            }
        }
        value
    }

    fn take_front(&mut self, max_len: usize) -> &'a [u8] {
        let len = max_len.min(self.remaining_bytes);
        let data: &'a [u8] = self.data;
        let slice = &data[self.data_ptr..self.data_ptr + len];
        self.data_ptr += len;
        self.remaining_bytes -= len;
        slice
    }

    // -----------------------------------------------------------------
    // Tail reads
    // -----------------------------------------------------------------

    /// Consumes one byte and returns its least significant bit.
    pub fn consume_boolean(&mut self) -> bool {
        self.accumulate(1, End::Back) & 1 == 1
    }

    /// Consumes up to `n_bytes` bytes (at most 6) and returns them as an integral.
    ///
    /// Signed values cover `[-2^(8n-1), 2^(8n-1) - 1]` and are produced by offsetting
    /// the unsigned reading from the range minimum.
    pub fn consume_integral(&mut self, n_bytes: usize, signed: bool) -> Result<i64, ProviderError> {
        let (min, max) = fixed_width_bounds(n_bytes, signed)?;
        self.integral_in_range(min, max, End::Back)
    }

    /// Consumes as many bytes as the range `[min, max]` needs and maps them into it.
    ///
    /// Returns `min` without consuming anything if `min == max` or the input is exhausted.
    pub fn consume_integral_in_range(&mut self, min: i64, max: i64) -> Result<i64, ProviderError> {
        self.integral_in_range(min, max, End::Back)
    }

    /// Like [`consume_integral`](Self::consume_integral) but backed by a 128-bit accumulator.
    pub fn consume_big_integral(
        &mut self,
        n_bytes: usize,
        signed: bool,
    ) -> Result<i128, ProviderError> {
        let (min, max) = big_bounds(n_bytes, signed)?;
        self.big_integral_in_range(min, max, End::Back)
    }

    /// Like [`consume_integral_in_range`](Self::consume_integral_in_range) for 128-bit ranges.
    pub fn consume_big_integral_in_range(
        &mut self,
        min: i128,
        max: i128,
    ) -> Result<i128, ProviderError> {
        self.big_integral_in_range(min, max, End::Back)
    }

    /// Consumes the last 8 bytes as a raw little-endian IEEE-754 double.
    ///
    /// The result may be NaN or infinite. With fewer than 8 bytes left, the
    /// remaining bytes become the high-order bytes of the value.
    pub fn consume_number(&mut self) -> f64 {
        if self.remaining_bytes == 0 {
            return 0.0;
        }
        let mut buf = [0u8; 8];
        if self.remaining_bytes < 8 {
            let len = self.remaining_bytes;
            buf[8 - len..].copy_from_slice(&self.data[self.data_ptr..self.data_ptr + len]);
            self.remaining_bytes = 0;
        } else {
            self.remaining_bytes -= 8;
            let start = self.data_ptr + self.remaining_bytes;
            buf.copy_from_slice(&self.data[start..start + 8]);
        }
        f64::from_le_bytes(buf)
    }

    /// Alias of [`consume_double_in_range`](Self::consume_double_in_range).
    pub fn consume_number_in_range(&mut self, min: f64, max: f64) -> Result<f64, ProviderError> {
        self.consume_double_in_range(min, max)
    }

    /// Consumes 4 bytes and returns a value in `[0.0, 1.0]`.
    pub fn consume_probability_float(&mut self) -> f64 {
        let value = self.accumulate(4, End::Back);
        value as f64 / f64::from(u32::MAX)
    }

    /// Consumes 8 bytes and returns a value in `[0.0, 1.0]`.
    pub fn consume_probability_double(&mut self) -> f64 {
        let value = self.accumulate(8, End::Back);
        value as f64 / u64::MAX as f64
    }

    /// Consumes a float anywhere in `[-f32::MAX, f32::MAX]`.
    pub fn consume_float(&mut self) -> f32 {
        // The range is valid, so the only error path is unreachable.
        self.consume_float_in_range(f32::MIN, f32::MAX)
            .unwrap_or(f32::MIN)
    }

    /// Consumes at most 5 bytes and maps them to a float in `[min, max]`.
    pub fn consume_float_in_range(&mut self, min: f32, max: f32) -> Result<f32, ProviderError> {
        if min == max {
            return Ok(min);
        }
        if min > max {
            return Err(ProviderError::InvalidFloatRange {
                min: f64::from(min),
                max: f64::from(max),
            });
        }
        let (min, max) = (f64::from(min), f64::from(max));
        let mut result = min;
        let range = if min < 0.0 && max > 0.0 && max > min + FLOAT_MAX {
            let half = max / 2.0 - min / 2.0;
            if self.consume_boolean() {
                result += half;
            }
            half
        } else {
            max - min
        };
        Ok((result + range * self.consume_probability_float()) as f32)
    }

    /// Consumes a double anywhere in `[-f64::MAX, f64::MAX]`.
    pub fn consume_double(&mut self) -> f64 {
        self.consume_double_in_range(f64::MIN, f64::MAX)
            .unwrap_or(f64::MIN)
    }

    /// Consumes at most 9 bytes and maps them to a double in `[min, max]`.
    pub fn consume_double_in_range(&mut self, min: f64, max: f64) -> Result<f64, ProviderError> {
        if min == max {
            return Ok(min);
        }
        if min > max {
            return Err(ProviderError::InvalidFloatRange { min, max });
        }
        let mut result = min;
        let range = if min < 0.0 && max > 0.0 && max > min + f64::MAX {
            let half = max / 2.0 - min / 2.0;
            if self.consume_boolean() {
                result += half;
            }
            half
        } else {
            max - min
        };
        Ok(result + range * self.consume_probability_double())
    }

    /// Picks one element of `values`. The distribution is not perfectly uniform.
    pub fn pick_value<'v, T>(&mut self, values: &'v [T]) -> Result<&'v T, ProviderError> {
        if values.is_empty() {
            return Err(ProviderError::EmptyCollection);
        }
        let index = self.consume_integral_in_range(0, last_index(values.len()))?;
        Ok(&values[index as usize])
    }

    /// Picks `count` distinct positions of `values` without replacement.
    ///
    /// Each draw indexes into a shrinking working copy, so once the input is
    /// exhausted every draw yields index 0 and the remaining elements come out
    /// in their original order.
    pub fn pick_values<T: Clone>(
        &mut self,
        values: &[T],
        count: usize,
    ) -> Result<Vec<T>, ProviderError> {
        if values.is_empty() {
            return Err(ProviderError::EmptyCollection);
        }
        if count > values.len() {
            return Err(ProviderError::TooManyElements {
                requested: count,
                available: values.len(),
            });
        }
        let mut working = values.to_vec();
        let mut picked = Vec::with_capacity(count);
        for _ in 0..count {
            let index = self.consume_integral_in_range(0, last_index(working.len()))?;
            picked.push(working.remove(index as usize));
        }
        Ok(picked)
    }

    // -----------------------------------------------------------------
    // Front reads
    // -----------------------------------------------------------------

    /// Consumes up to `max_len` bytes, one boolean per byte.
    pub fn consume_booleans(&mut self, max_len: usize) -> Vec<bool> {
        self.take_front(max_len)
            .iter()
            .map(|byte| byte & 1 == 1)
            .collect()
    }

    /// Consumes up to `max_len` integrals of `n_bytes` bytes each.
    ///
    /// The last element may be built from fewer bytes when the input runs short.
    pub fn consume_integrals(
        &mut self,
        max_len: usize,
        n_bytes: usize,
        signed: bool,
    ) -> Result<Vec<i64>, ProviderError> {
        let (min, max) = fixed_width_bounds(n_bytes, signed)?;
        let count = self.front_element_count(max_len, n_bytes);
        (0..count)
            .map(|_| self.integral_in_range(min, max, End::Front))
            .collect()
    }

    /// Consumes up to `max_len` big integrals of `n_bytes` bytes each.
    pub fn consume_big_integrals(
        &mut self,
        max_len: usize,
        n_bytes: usize,
        signed: bool,
    ) -> Result<Vec<i128>, ProviderError> {
        let (min, max) = big_bounds(n_bytes, signed)?;
        let count = self.front_element_count(max_len, n_bytes);
        (0..count)
            .map(|_| self.big_integral_in_range(min, max, End::Front))
            .collect()
    }

    /// Consumes up to `max_len` raw big-endian doubles.
    pub fn consume_numbers(&mut self, max_len: usize) -> Vec<f64> {
        let count = self.front_element_count(max_len, 8);
        (0..count).map(|_| self.consume_number_front()).collect()
    }

    /// Consumes up to `max_len` bytes from the front.
    pub fn consume_bytes(&mut self, max_len: usize) -> Vec<u8> {
        self.take_front(max_len).to_vec()
    }

    /// Consumes everything that is left. Later reads only return fallback values.
    pub fn consume_remaining_as_bytes(&mut self) -> Vec<u8> {
        self.consume_bytes(self.remaining_bytes)
    }

    /// Consumes up to `max_len` bytes and decodes them with `encoding`.
    ///
    /// With `printable` set, every byte is first mapped into the printable ASCII
    /// range `32..=126`.
    pub fn consume_string(
        &mut self,
        max_len: usize,
        encoding: TextEncoding,
        printable: bool,
    ) -> String {
        let bytes = self.take_front(max_len);
        if printable {
            let mapped: Vec<u8> = bytes.iter().map(|b| 32 + b % 95).collect();
            decode(&mapped, encoding)
        } else {
            decode(bytes, encoding)
        }
    }

    pub fn consume_remaining_as_string(&mut self, encoding: TextEncoding, printable: bool) -> String {
        self.consume_string(self.remaining_bytes, encoding, printable)
    }

    /// Consumes `array_len` strings of at most `max_string_len` bytes each.
    pub fn consume_string_array(
        &mut self,
        array_len: usize,
        max_string_len: usize,
        encoding: TextEncoding,
        printable: bool,
    ) -> Vec<String> {
        (0..array_len)
            .map(|_| self.consume_string(max_string_len, encoding, printable))
            .collect()
    }

    // -----------------------------------------------------------------
    // Shared range mapping
    // -----------------------------------------------------------------

    fn front_element_count(&self, max_len: usize, n_bytes: usize) -> usize {
        if n_bytes == 0 {
            return 0;
        }
        self.remaining_bytes
            .min(max_len.saturating_mul(n_bytes))
            .div_ceil(n_bytes)
    }

    fn consume_number_front(&mut self) -> f64 {
        let bytes = self.take_front(8);
        let mut buf = [0u8; 8];
        buf[..bytes.len()].copy_from_slice(bytes);
        f64::from_be_bytes(buf)
    }

    fn integral_in_range(&mut self, min: i64, max: i64, end: End) -> Result<i64, ProviderError> {
        if min == max {
            return Ok(min);
        }
        if min > max {
            return Err(ProviderError::InvalidRange {
                min: i128::from(min),
                max: i128::from(max),
            });
        }
        if self.remaining_bytes == 0 {
            return Ok(min);
        }
        if max > MAX_SAFE_INTEGER {
            return Err(ProviderError::ValueTooLarge { max });
        }
        let range = (i128::from(max) - i128::from(min)) as u128;
        let n_bytes = bytes_for_range(range).min(self.remaining_bytes);
        if n_bytes > MAX_FIXED_WIDTH_BYTES {
            return Err(ProviderError::TooManyBytes {
                requested: n_bytes,
                max: MAX_FIXED_WIDTH_BYTES,
            });
        }
        let value = self.accumulate(n_bytes, end);
        Ok((i128::from(min) + (value % (range + 1)) as i128) as i64)
    }

    fn big_integral_in_range(
        &mut self,
        min: i128,
        max: i128,
        end: End,
    ) -> Result<i128, ProviderError> {
        if min == max {
            return Ok(min);
        }
        if min > max {
            return Err(ProviderError::InvalidRange { min, max });
        }
        let range = max.wrapping_sub(min) as u128;
        let mut value: u128 = 0;
        let mut offset = 0u32;
        while offset < u128::BITS && range >> offset > 0 {
            match self.next_byte(end) {
                Some(byte) => value = (value << 8) | u128::from(byte),
                None => break,
            }
            offset += 8;
        }
        let reduced = match range.checked_add(1) {
            Some(modulus) => value % modulus,
            None => value,
        };
        Ok(min.wrapping_add(reduced as i128))
    }
}

fn last_index(len: usize) -> i64 {
    len.saturating_sub(1) as i64
}

fn bytes_for_range(range: u128) -> usize {
    ((u128::BITS - range.leading_zeros()) as usize).div_ceil(8)
}

fn fixed_width_bounds(n_bytes: usize, signed: bool) -> Result<(i64, i64), ProviderError> {
    if n_bytes > MAX_FIXED_WIDTH_BYTES {
        return Err(ProviderError::TooManyBytes {
            requested: n_bytes,
            max: MAX_FIXED_WIDTH_BYTES,
        });
    }
    if n_bytes == 0 {
        return Ok((0, 0));
    }
    let bits = 8 * n_bytes as u32;
    Ok(if signed {
        (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
    } else {
        (0, (1i64 << bits) - 1)
    })
}

fn big_bounds(n_bytes: usize, signed: bool) -> Result<(i128, i128), ProviderError> {
    let max_bytes = if signed {
        MAX_SIGNED_BIG_BYTES
    } else {
        MAX_UNSIGNED_BIG_BYTES
    };
    if n_bytes > max_bytes {
        return Err(ProviderError::BigIntegralTooWide {
            requested: n_bytes,
            max: max_bytes,
        });
    }
    if n_bytes == 0 {
        return Ok((0, 0));
    }
    let bits = 8 * n_bytes as u32;
    Ok(if signed {
        let half = 1u128 << (bits - 1);
        (0i128.wrapping_sub_unsigned(half), (half - 1) as i128)
    } else {
        (0, ((1u128 << bits) - 1) as i128)
    })
}

fn decode(bytes: &[u8], encoding: TextEncoding) -> String {
    match encoding {
        TextEncoding::Ascii => bytes.iter().map(|b| char::from(b & 0x7f)).collect(),
        TextEncoding::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        TextEncoding::Utf16Le => {
            let units = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
            char::decode_utf16(units)
                .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect()
        }
        TextEncoding::Hex => hex::encode(bytes),
    }
}
