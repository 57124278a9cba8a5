//! Byte-packed bitmap shared by the LPCA and SFM sketches.
//!
//! A [`Bitmap`] is a fixed-length array of bits stored in a `Vec<u8>`, with
//! bit `i` living in byte `i / 8` at shift `i % 8`. On top of plain get/set
//! it supports the operations the privacy mechanisms need: deterministic
//! flips, independent per-bit randomized flips, population counts, and
//! non-mutating OR/XOR combination.

use std::io::Read;
use std::mem::size_of;

use crate::error::SketchError;
use crate::random::RandomizationStrategy;

const BITS_PER_BYTE: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bitmap {
    bytes: Vec<u8>,
}

impl Bitmap {
    /// Create an all-zero bitmap of `bit_length` bits.
    ///
    /// `bit_length` must be a positive multiple of 8.
    pub fn new(bit_length: usize) -> Result<Self, SketchError> {
        validate_length(bit_length)?;
        Ok(Self {
            bytes: vec![0; bit_length / BITS_PER_BYTE],
        })
    }

    /// Wrap an existing byte buffer, taking ownership. The contents are not
    /// validated; every byte is 8 bits of the map.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Read exactly `bit_length / 8` bytes from `input`.
    pub fn from_reader<R: Read>(input: &mut R, bit_length: usize) -> Result<Self, SketchError> {
        validate_length(bit_length)?;
        let mut bytes = vec![0; bit_length / BITS_PER_BYTE];
        input.read_exact(&mut bytes)?;
        Ok(Self { bytes })
    }

    pub fn to_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn byte_length(&self) -> usize {
        self.bytes.len()
    }

    /// Number of bits in the map.
    pub fn length(&self) -> usize {
        self.bytes.len() * BITS_PER_BYTE
    }

    #[inline]
    fn byte_index(position: usize) -> usize {
        position / BITS_PER_BYTE
    }

    #[inline]
    fn bit_shift(position: usize) -> usize {
        position % BITS_PER_BYTE
    }

    /// # Panics
    ///
    /// Panics if `position >= self.length()`, as does every other
    /// single-bit operation below.
    #[inline]
    pub fn get_bit(&self, position: usize) -> bool {
        (self.bytes[Self::byte_index(position)] >> Self::bit_shift(position)) & 1 == 1
    }

    /// Explicitly set the value of the bit at a given position.
    #[inline]
    pub fn set_bit(&mut self, position: usize, value: bool) {
        let one_bit = 1u8 << Self::bit_shift(position);
        if value {
            self.bytes[Self::byte_index(position)] |= one_bit;
        } else {
            self.bytes[Self::byte_index(position)] &= !one_bit;
        }
    }

    /// Deterministically flip the bit at a given position.
    #[inline]
    pub fn flip_bit(&mut self, position: usize) {
        self.bytes[Self::byte_index(position)] ^= 1 << Self::bit_shift(position);
    }

    /// Flip the bit at a given position with the specified probability.
    pub fn flip_bit_with_probability<S: RandomizationStrategy>(
        &mut self,
        position: usize,
        probability: f64,
        strategy: &mut S,
    ) {
        if strategy.next_boolean(probability) {
            self.flip_bit(position);
        }
    }

    /// Randomly and independently flip every bit with the specified
    /// probability: one Bernoulli trial per bit, not one for the whole map.
    pub fn flip_all<S: RandomizationStrategy>(&mut self, probability: f64, strategy: &mut S) {
        for position in 0..self.length() {
            self.flip_bit_with_probability(position, probability, strategy);
        }
    }

    /// The number of 1-bits in the bitmap.
    pub fn bit_count(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Byte-wise OR with another bitmap of the same length, returning a new
    /// bitmap and leaving both inputs untouched.
    pub fn or(&self, other: &Bitmap) -> Result<Bitmap, SketchError> {
        self.combine(other, "OR", |a, b| a | b)
    }

    /// Byte-wise XOR with another bitmap of the same length, returning a new
    /// bitmap and leaving both inputs untouched.
    pub fn xor(&self, other: &Bitmap) -> Result<Bitmap, SketchError> {
        self.combine(other, "XOR", |a, b| a ^ b)
    }

    fn combine(
        &self,
        other: &Bitmap,
        operation: &str,
        apply: impl Fn(u8, u8) -> u8,
    ) -> Result<Bitmap, SketchError> {
        if self.bytes.len() != other.bytes.len() {
            return Err(SketchError::InvalidArgument(format!(
                "cannot {operation} two bitmaps of different size: {} vs {}",
                self.length(),
                other.length()
            )));
        }
        let bytes = self
            .bytes
            .iter()
            .zip(other.bytes.iter())
            .map(|(&a, &b)| apply(a, b))
            .collect();
        Ok(Bitmap { bytes })
    }

    /// Memory retained by this bitmap, for accounting only.
    pub fn retained_size_in_bytes(&self) -> usize {
        size_of::<Self>() + self.bytes.capacity()
    }
}

fn validate_length(bit_length: usize) -> Result<(), SketchError> {
    if bit_length == 0 || bit_length % BITS_PER_BYTE != 0 {
        return Err(SketchError::InvalidArgument(format!(
            "bitmap size must be a positive multiple of {BITS_PER_BYTE}: {bit_length}"
        )));
    }
    Ok(())
}
