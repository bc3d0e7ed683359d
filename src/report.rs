// SPDX-License-Identifier: MIT

//! Bit-level unpacking of input/feature report buffers into element values
//! and packing of element values into output report buffers.
//!
//! The packing rules cover the field shapes real descriptors use: sub-byte
//! widths of 1, 2 or 4 bits packed into successive positions of one byte
//! starting at bit 0, 8-bit fields occupying a whole byte, and 16-bit fields
//! spanning two bytes little-endian. Any other width is
//! [CodecError::UnsupportedFieldWidth], reported before a single element
//! value is touched.

use thiserror::Error;
use tracing::trace;

use crate::{ensure, DeviceDescriptor, Direction, Element, ReportId};

#[derive(Error, Debug)]
pub enum CodecError {
    /// A field width outside the modeled set of 1, 2, 4, 8 and 16 bits.
    #[error("field width of {bits} bits is not supported")]
    UnsupportedFieldWidth { bits: usize },
    /// The report ID never appeared in the descriptor.
    #[error("report id {id} does not appear in the descriptor")]
    UnknownReportId { id: ReportId },
    #[error("device i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, CodecError>;

/// Receiver for decoded report data.
///
/// [decode_input_report] and [decode_feature_report] call
/// [element](ReportHandler::element) once per decoded field in declaration
/// order and [report](ReportHandler::report) once after the whole buffer has
/// been consumed. Both are no-ops by default; `()` implements the trait for
/// callers that only want the updated element values.
pub trait ReportHandler {
    fn element(&mut self, _element: &Element) {}
    fn report(&mut self, _descriptor: &DeviceDescriptor) {}
}

impl ReportHandler for () {}

/// Decode one input report buffer into the descriptor's input elements.
pub fn decode_input_report(
    bytes: &[u8],
    descriptor: &mut DeviceDescriptor,
    handler: &mut impl ReportHandler,
) -> Result<()> {
    decode_report(bytes, descriptor, Direction::Input, handler)
}

/// Decode one feature report buffer into the descriptor's feature elements.
pub fn decode_feature_report(
    bytes: &[u8],
    descriptor: &mut DeviceDescriptor,
    handler: &mut impl ReportHandler,
) -> Result<()> {
    decode_report(bytes, descriptor, Direction::Feature, handler)
}

fn supported_width(bits: usize) -> Result<()> {
    ensure!(
        matches!(bits, 1 | 2 | 4 | 8 | 16),
        CodecError::UnsupportedFieldWidth { bits }
    );
    Ok(())
}

fn store(
    descriptor: &mut DeviceDescriptor,
    index: usize,
    value: u32,
    handler: &mut impl ReportHandler,
) {
    descriptor.elements[index].value = value;
    trace!(index, value, "decoded element");
    handler.element(&descriptor.elements[index]);
}

/// One walk shared by both decode directions. The buffer drives the loop:
/// each consumed byte fills one or more elements, and the walk ends when
/// either the buffer or the elements of the requested direction run out.
fn decode_report(
    bytes: &[u8],
    descriptor: &mut DeviceDescriptor,
    direction: Direction,
    handler: &mut impl ReportHandler,
) -> Result<()> {
    let ids: Vec<usize> = descriptor
        .elements
        .iter()
        .filter(|e| e.direction() == direction)
        .map(|e| e.index())
        .collect();
    for &id in &ids {
        supported_width(descriptor.elements[id].report_size())?;
    }

    let mut walk = ids.into_iter();
    let mut current = match walk.next() {
        Some(id) => id,
        None => return Ok(()),
    };

    let mut i = 0;
    'bytes: while i < bytes.len() {
        match descriptor.elements[current].report_size() {
            8 => {
                store(descriptor, current, u32::from(bytes[i]), handler);
                i += 1;
                match walk.next() {
                    Some(next) => current = next,
                    None => break,
                }
            }
            16 => {
                // A field is only stored once fully assembled: a buffer that
                // ends between the two bytes ends the walk instead.
                let Some(&hi) = bytes.get(i + 1) else {
                    break;
                };
                let value = u32::from(bytes[i]) | (u32::from(hi) << 8);
                store(descriptor, current, value, handler);
                i += 2;
                match walk.next() {
                    Some(next) => current = next,
                    None => break,
                }
            }
            mut size => {
                // Sub-byte fields pack into one byte from bit 0 upwards. A
                // wider element after a partially consumed byte starts on the
                // next byte boundary.
                let mut shift = 0;
                while shift + size <= 8 {
                    let mask = (1u32 << size) - 1;
                    let value = (u32::from(bytes[i]) >> shift) & mask;
                    store(descriptor, current, value, handler);
                    shift += size;
                    match walk.next() {
                        Some(next) => current = next,
                        None => break 'bytes,
                    }
                    size = descriptor.elements[current].report_size();
                    if size >= 8 {
                        break;
                    }
                }
                i += 1;
            }
        }
    }

    handler.report(descriptor);
    Ok(())
}

fn put(buf: &mut Vec<u8>, index: usize) -> &mut u8 {
    if index >= buf.len() {
        buf.resize(index + 1, 0);
    }
    &mut buf[index]
}

/// Pack the current values of all Output elements belonging to `id` into a
/// report buffer ready to send to the device.
///
/// The buffer length is the nominal length from the descriptor's report
/// table, `ceil(output_bits / 8)`, preceded by one id byte when `id` is not
/// [ReportId::NONE]. Unfilled trailing bits stay zero. An id that never
/// appeared in the descriptor is [CodecError::UnknownReportId]; an id with
/// zero output bits yields the nominal (possibly empty) buffer.
pub fn encode_output_report(descriptor: &DeviceDescriptor, id: ReportId) -> Result<Vec<u8>> {
    let output_bits = descriptor
        .output_bits(id)
        .ok_or(CodecError::UnknownReportId { id })?;

    let elements: Vec<&Element> = descriptor
        .elements
        .iter()
        .filter(|e| e.direction() == Direction::Output && e.report_id() == id)
        .collect();
    for element in &elements {
        supported_width(element.report_size())?;
    }

    let prefix = usize::from(id != ReportId::NONE);
    let nominal = prefix + output_bits.div_ceil(8);
    let mut buf = vec![0u8; nominal];
    if prefix == 1 {
        buf[0] = id.into();
    }

    let mut i = prefix;
    let mut shift = 0;
    for element in elements {
        match element.report_size() {
            8 => {
                if shift != 0 {
                    i += 1;
                    shift = 0;
                }
                *put(&mut buf, i) = (element.value() & 0xff) as u8;
                i += 1;
            }
            16 => {
                if shift != 0 {
                    i += 1;
                    shift = 0;
                }
                *put(&mut buf, i) = (element.value() & 0xff) as u8;
                *put(&mut buf, i + 1) = ((element.value() >> 8) & 0xff) as u8;
                i += 2;
            }
            size => {
                if shift + size > 8 {
                    i += 1;
                    shift = 0;
                }
                let mask = (1u32 << size) - 1;
                *put(&mut buf, i) |= ((element.value() & mask) << shift) as u8;
                shift += size;
                if shift == 8 {
                    i += 1;
                    shift = 0;
                }
            }
        }
    }

    // A descriptor whose output bits disagree with its field widths could
    // have grown the buffer past the nominal length; the table is the
    // contract, so cut back to it.
    buf.resize(nominal, 0);
    trace!(id = %id, len = buf.len(), "encoded output report");
    Ok(buf)
}

impl Element {
    /// The last decoded value sign-extended by this element's bit width.
    pub fn signed_value(&self) -> i32 {
        let bits = self.report_size();
        if bits == 0 || bits >= 32 {
            return self.value() as i32;
        }
        let shift = 32 - bits as u32;
        ((self.value() << shift) as i32) >> shift
    }

    /// The value's position in the logical range, clamped to `0.0..=1.0`.
    /// A degenerate logical range maps to zero.
    pub fn normalized_value(&self) -> f64 {
        let min = f64::from(self.logical_minimum());
        let max = f64::from(self.logical_maximum());
        if max <= min {
            return 0.0;
        }
        ((f64::from(self.signed_value()) - min) / (max - min)).clamp(0.0, 1.0)
    }

    /// Logical counts per physical unit, see Section 6.2.2.7:
    /// `(logical_max - logical_min) / ((phys_max - phys_min) * 10^exponent)`.
    /// Zero when the physical span is degenerate.
    pub fn resolution(&self) -> f64 {
        let logical_span = f64::from(self.logical_maximum() - self.logical_minimum());
        let physical_span = f64::from(self.physical_maximum() - self.physical_minimum())
            * 10f64.powi(self.unit_exponent());
        if physical_span == 0.0 {
            return 0.0;
        }
        logical_span / physical_span
    }

    /// The value mapped into physical units. Falls back to the raw signed
    /// value when no resolution can be derived.
    pub fn physical_value(&self) -> f64 {
        let resolution = self.resolution();
        if resolution == 0.0 {
            return f64::from(self.signed_value());
        }
        f64::from(self.physical_minimum())
            + f64::from(self.signed_value() - self.logical_minimum()) / resolution
    }
}
