//! Bit-level little-endian packing for the wire protocol.
//!
//! The writer packs values least-significant-bit first within each byte; the
//! reader tracks a bit cursor and goes sticky-errored on overread instead of
//! panicking, so truncated packets surface as a failed decode.

use glam::Vec3;

pub struct BitWriter {
    buffer: Vec<u8>,
    bit_position: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
            bit_position: 0,
        }
    }

    /// Write the low `num_bits` of `value`. Widths outside 1..=64 are
    /// ignored.
    pub fn write_bits(&mut self, mut value: u64, mut num_bits: usize) {
        if num_bits == 0 || num_bits > 64 {
            return;
        }
        while num_bits > 0 {
            let byte_index = self.bit_position / 8;
            let bit_index = self.bit_position % 8;
            if byte_index >= self.buffer.len() {
                self.buffer.push(0);
            }

            let bits_in_byte = num_bits.min(8 - bit_index);
            let mask = (1u64 << bits_in_byte) - 1;
            let bits = (value & mask) as u8;
            self.buffer[byte_index] |= bits << bit_index;

            value >>= bits_in_byte;
            num_bits -= bits_in_byte;
            self.bit_position += bits_in_byte;
        }
    }

    pub fn write_byte(&mut self, value: u8) {
        self.write_bits(value as u64, 8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_bits(value as u64, 16);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_bits(value as u64, 32);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_bits(value as u64, 1);
    }

    pub fn write_vec3(&mut self, value: Vec3) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
    }

    /// Quantize each component into `bits_per_component` bits over
    /// `[min, max]`.
    pub fn write_vec3_quantized(&mut self, value: Vec3, min: f32, max: f32, bits_per_component: usize) {
        for component in [value.x, value.y, value.z] {
            self.write_bits(quantize(component, min, max, bits_per_component) as u64, bits_per_component);
        }
    }

    /// Fixed-width string: exactly `width` bytes, truncated or null-padded.
    pub fn write_string(&mut self, value: &str, width: usize) {
        let bytes = value.as_bytes();
        for index in 0..width {
            self.write_byte(bytes.get(index).copied().unwrap_or(0));
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    pub fn byte_size(&self) -> usize {
        self.bit_position.div_ceil(8)
    }

    pub fn bit_size(&self) -> usize {
        self.bit_position
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.bit_position = 0;
    }
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

pub struct BitReader<'a> {
    buffer: &'a [u8],
    bit_position: usize,
    error: bool,
}

impl<'a> BitReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            bit_position: 0,
            error: false,
        }
    }

    pub fn has_error(&self) -> bool {
        self.error
    }

    /// Read `num_bits` bits. On overread the error flag goes sticky and the
    /// partially-read value is returned.
    pub fn read_bits(&mut self, mut num_bits: usize) -> u64 {
        if num_bits == 0 || num_bits > 64 {
            return 0;
        }
        let mut result = 0u64;
        let mut bits_read = 0usize;
        while num_bits > 0 {
            let byte_index = self.bit_position / 8;
            let bit_index = self.bit_position % 8;
            if byte_index >= self.buffer.len() {
                self.error = true;
                return result;
            }

            let bits_in_byte = num_bits.min(8 - bit_index);
            let mask = ((1u16 << bits_in_byte) - 1) as u8;
            let bits = (self.buffer[byte_index] >> bit_index) & mask;
            result |= (bits as u64) << bits_read;

            num_bits -= bits_in_byte;
            bits_read += bits_in_byte;
            self.bit_position += bits_in_byte;
        }
        result
    }

    pub fn read_byte(&mut self) -> u8 {
        self.read_bits(8) as u8
    }

    pub fn read_u16(&mut self) -> u16 {
        self.read_bits(16) as u16
    }

    pub fn read_u32(&mut self) -> u32 {
        self.read_bits(32) as u32
    }

    pub fn read_f32(&mut self) -> f32 {
        f32::from_bits(self.read_u32())
    }

    pub fn read_bool(&mut self) -> bool {
        self.read_bits(1) != 0
    }

    pub fn read_vec3(&mut self) -> Vec3 {
        let x = self.read_f32();
        let y = self.read_f32();
        let z = self.read_f32();
        Vec3::new(x, y, z)
    }

    pub fn read_vec3_quantized(&mut self, min: f32, max: f32, bits_per_component: usize) -> Vec3 {
        let x = dequantize(self.read_bits(bits_per_component) as u32, min, max, bits_per_component);
        let y = dequantize(self.read_bits(bits_per_component) as u32, min, max, bits_per_component);
        let z = dequantize(self.read_bits(bits_per_component) as u32, min, max, bits_per_component);
        Vec3::new(x, y, z)
    }

    /// Fixed-width string: consumes exactly `width` bytes, returns the
    /// content up to the first null.
    pub fn read_string(&mut self, width: usize) -> String {
        let mut bytes = Vec::with_capacity(width);
        let mut terminated = false;
        for _ in 0..width {
            let byte = self.read_byte();
            if byte == 0 {
                terminated = true;
            }
            if !terminated {
                bytes.push(byte);
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn can_read(&self, num_bits: usize) -> bool {
        self.bit_position + num_bits <= self.buffer.len() * 8
    }

    pub fn bit_position(&self) -> usize {
        self.bit_position
    }

    pub fn skip_bits(&mut self, num_bits: usize) {
        self.bit_position += num_bits;
    }

    pub fn reset(&mut self) {
        self.bit_position = 0;
        self.error = false;
    }
}

fn quantize(value: f32, min: f32, max: f32, bits: usize) -> u32 {
    let normalized = ((value - min) / (max - min)).clamp(0.0, 1.0);
    let max_value = (1u32 << bits) - 1;
    (normalized * max_value as f32) as u32
}

fn dequantize(value: u32, min: f32, max: f32, bits: usize) -> f32 {
    let max_value = (1u32 << bits) - 1;
    min + (value as f32 / max_value as f32) * (max - min)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_width_round_trip() {
        let mut writer = BitWriter::new();
        writer.write_bool(true);
        writer.write_bits(0b101, 3);
        writer.write_byte(0xab);
        writer.write_u16(0xbeef);
        writer.write_u32(0xdead_cafe);
        writer.write_f32(-12.625);

        let mut reader = BitReader::new(writer.data());
        assert!(reader.read_bool());
        assert_eq!(reader.read_bits(3), 0b101);
        assert_eq!(reader.read_byte(), 0xab);
        assert_eq!(reader.read_u16(), 0xbeef);
        assert_eq!(reader.read_u32(), 0xdead_cafe);
        assert_eq!(reader.read_f32(), -12.625);
        assert!(!reader.has_error());
    }

    #[test]
    fn byte_size_rounds_up() {
        let mut writer = BitWriter::new();
        writer.write_bits(0b1_1111, 5);
        assert_eq!(writer.bit_size(), 5);
        assert_eq!(writer.byte_size(), 1);
        writer.write_bits(0b1111, 4);
        assert_eq!(writer.byte_size(), 2);
    }

    #[test]
    fn overread_sets_sticky_error() {
        let data = [0xffu8; 2];
        let mut reader = BitReader::new(&data);
        assert!(reader.can_read(16));
        assert!(!reader.can_read(17));
        reader.read_u16();
        assert!(!reader.has_error());
        reader.read_byte();
        assert!(reader.has_error());
        // The flag stays set.
        reader.read_u32();
        assert!(reader.has_error());
    }

    #[test]
    fn fixed_width_string_round_trip() {
        let mut writer = BitWriter::new();
        writer.write_string("player-one", 32);
        assert_eq!(writer.byte_size(), 32);

        let mut reader = BitReader::new(writer.data());
        assert_eq!(reader.read_string(32), "player-one");
        assert_eq!(reader.bit_position(), 32 * 8);
        assert!(!reader.has_error());
    }

    #[test]
    fn oversized_string_is_truncated() {
        let long = "x".repeat(80);
        let mut writer = BitWriter::new();
        writer.write_string(&long, 8);
        assert_eq!(writer.byte_size(), 8);

        let mut reader = BitReader::new(writer.data());
        assert_eq!(reader.read_string(8), "x".repeat(8));
    }

    #[test]
    fn vec3_round_trip() {
        let mut writer = BitWriter::new();
        let value = Vec3::new(1.5, -2.25, 1024.0);
        writer.write_vec3(value);

        let mut reader = BitReader::new(writer.data());
        assert_eq!(reader.read_vec3(), value);
    }

    #[test]
    fn quantized_vec3_stays_within_precision() {
        let mut writer = BitWriter::new();
        let value = Vec3::new(-10.0, 0.5, 99.9);
        writer.write_vec3_quantized(value, -100.0, 100.0, 16);

        let mut reader = BitReader::new(writer.data());
        let decoded = reader.read_vec3_quantized(-100.0, 100.0, 16);
        let step = 200.0 / ((1u32 << 16) - 1) as f32;
        assert!((decoded - value).abs().max_element() <= step);
    }
}
