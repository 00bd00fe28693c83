//! MSB-first bit writer and reader

use crate::constants::MAX_FIELD_WIDTH;
use crate::core::error::DecodingError;

/// Accumulates values of arbitrary bit width into bytes
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    current: u8,
    used: u32,
}

impl BitWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with room for `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Write the low `width` bits of `value`, most significant first.
    ///
    /// Callers guarantee `value < 2^width`.
    pub fn write(&mut self, value: u32, width: u32) {
        debug_assert!(width <= 32);
        debug_assert!(width == 32 || u64::from(value) < (1u64 << width));
        for shift in (0..width).rev() {
            let bit = ((value >> shift) & 1) as u8;
            self.current = (self.current << 1) | bit;
            self.used += 1;
            if self.used == 8 {
                self.bytes.push(self.current);
                self.current = 0;
                self.used = 0;
            }
        }
    }

    /// Write a whole byte
    pub fn write_byte(&mut self, byte: u8) {
        if self.used == 0 {
            self.bytes.push(byte);
        } else {
            self.write(u32::from(byte), 8);
        }
    }

    /// Zero-pad to the next byte boundary
    pub fn align(&mut self) {
        if self.used > 0 {
            self.bytes.push(self.current << (8 - self.used));
            self.current = 0;
            self.used = 0;
        }
    }

    /// Finish the stream (aligning it) and return the bytes
    pub fn finish(mut self) -> Vec<u8> {
        self.align();
        self.bytes
    }
}

/// Reads values of arbitrary bit width from a byte slice
#[derive(Debug)]
pub struct BitReader<'a> {
    bytes: &'a [u8],
    bit_pos: usize,
    operation: usize,
}

impl<'a> BitReader<'a> {
    /// Create a reader over `bytes`
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            bit_pos: 0,
            operation: 0,
        }
    }

    /// Set the operation index reported in errors
    pub fn set_operation(&mut self, operation: usize) {
        self.operation = operation;
    }

    /// Read `width` bits as an unsigned value
    pub fn read(&mut self, width: u32) -> Result<u32, DecodingError> {
        if width > MAX_FIELD_WIDTH {
            return Err(DecodingError::WidthOutOfRange { width });
        }
        if self.remaining_bits() < width as usize {
            return Err(DecodingError::UnexpectedEnd {
                operation: self.operation,
            });
        }

        let mut value = 0u32;
        for _ in 0..width {
            let byte = self.bytes[self.bit_pos / 8];
            let bit = (byte >> (7 - (self.bit_pos % 8))) & 1;
            value = (value << 1) | u32::from(bit);
            self.bit_pos += 1;
        }
        Ok(value)
    }

    /// Read one whole byte
    pub fn read_byte(&mut self) -> Result<u8, DecodingError> {
        if self.bit_pos % 8 == 0 {
            let byte = *self.bytes.get(self.bit_pos / 8).ok_or(DecodingError::UnexpectedEnd {
                operation: self.operation,
            })?;
            self.bit_pos += 8;
            Ok(byte)
        } else {
            self.read(8).map(|v| v as u8)
        }
    }

    /// Skip to the next byte boundary; padding bits must be zero
    pub fn align(&mut self) -> Result<(), DecodingError> {
        let rem = self.bit_pos % 8;
        if rem != 0 {
            let padding = self.read(8 - rem as u32)?;
            if padding != 0 {
                return Err(DecodingError::InvalidPadding {
                    operation: self.operation,
                });
            }
        }
        Ok(())
    }

    /// Bits not read yet
    pub fn remaining_bits(&self) -> usize {
        self.bytes.len() * 8 - self.bit_pos
    }

    /// All bytes consumed
    pub fn is_at_end(&self) -> bool {
        self.remaining_bits() == 0
    }
}
