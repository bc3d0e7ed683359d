// SPDX-License-Identifier: MIT

//! Transport-facing glue: fetch a report descriptor from a device and send
//! encoded output reports back to it.
//!
//! The transport itself (enumeration, open/close, blocking policy) stays
//! outside this crate. Callers implement [DeviceFacade] over whatever HID
//! backend they use; the functions here never retry and surface I/O errors
//! unchanged.

use std::io;

use thiserror::Error;
use tracing::debug;

use crate::report::{encode_output_report, CodecError};
use crate::{DeviceDescriptor, ParseError, ReportId};

/// Largest report descriptor a device may present, per the USB HID limit.
pub const MAX_DESCRIPTOR_SIZE: usize = 4096;

/// The two transport operations this crate needs from a HID backend.
pub trait DeviceFacade {
    /// Read the device's report descriptor into `buf`, returning the number
    /// of bytes actually read.
    fn read_report_descriptor(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Send one encoded report to the device, returning the number of bytes
    /// written.
    fn write_report(&mut self, bytes: &[u8]) -> io::Result<usize>;
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("device i/o failed: {0}")]
    Io(#[from] io::Error),
}

/// Read and parse a device's report descriptor. Only the bytes the transport
/// actually returned are parsed.
pub fn read_device_descriptor(
    device: &mut impl DeviceFacade,
) -> Result<DeviceDescriptor, DeviceError> {
    let mut buf = [0u8; MAX_DESCRIPTOR_SIZE];
    let len = device.read_report_descriptor(&mut buf)?.min(MAX_DESCRIPTOR_SIZE);
    debug!(len, "read report descriptor");
    Ok(DeviceDescriptor::try_from(&buf[..len])?)
}

/// Encode the current Output element values for `id` and write the report to
/// the device. Returns the number of bytes the transport accepted.
pub fn send_output_report(
    device: &mut impl DeviceFacade,
    descriptor: &DeviceDescriptor,
    id: ReportId,
) -> Result<usize, CodecError> {
    let report = encode_output_report(descriptor, id)?;
    debug!(id = %id, len = report.len(), "sending output report");
    Ok(device.write_report(&report)?)
}
