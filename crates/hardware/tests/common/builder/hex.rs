use blinksim_core::sim::loader::record_type;

/// Formats one record, computing its checksum.
pub fn record(kind: u8, offset: u16, payload: &[u8]) -> String {
    let mut raw = vec![payload.len() as u8, (offset >> 8) as u8, offset as u8, kind];
    raw.extend_from_slice(payload);
    let sum = raw.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    raw.push(sum.wrapping_neg());
    let digits: String = raw.iter().map(|b| format!("{b:02X}")).collect();
    format!(":{digits}")
}

/// A data record.
pub fn data(offset: u16, payload: &[u8]) -> String {
    record(record_type::DATA, offset, payload)
}

/// An extended linear address record selecting the upper 16 address bits.
pub fn linear(upper: u16) -> String {
    record(record_type::EXTENDED_LINEAR_ADDRESS, 0, &upper.to_be_bytes())
}

/// An extended segment address record.
pub fn segment(segment: u16) -> String {
    record(record_type::EXTENDED_SEGMENT_ADDRESS, 0, &segment.to_be_bytes())
}

/// The end-of-file record.
pub const EOF: &str = ":00000001FF";

/// Fluent builder for whole images.
#[derive(Debug, Default)]
pub struct HexBuilder {
    lines: Vec<String>,
}

impl HexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    pub fn data(self, offset: u16, payload: &[u8]) -> Self {
        self.line(data(offset, payload))
    }

    pub fn linear(self, upper: u16) -> Self {
        self.line(linear(upper))
    }

    /// Places `bytes` at an absolute 32-bit address, 16 bytes per record.
    pub fn bytes_at(mut self, addr: u32, bytes: &[u8]) -> Self {
        let mut upper = None;
        for (i, chunk) in bytes.chunks(16).enumerate() {
            let at = addr.wrapping_add((i * 16) as u32);
            let hi = (at >> 16) as u16;
            if upper != Some(hi) {
                self = self.linear(hi);
                upper = Some(hi);
            }
            self = self.data(at as u16, chunk);
        }
        self
    }

    /// Closes the image with an end-of-file record.
    pub fn build(self) -> String {
        self.line(EOF).build_open()
    }

    /// Joins the lines without appending an end-of-file record.
    pub fn build_open(self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }
}
