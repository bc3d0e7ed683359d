// SPDX-License-Identifier: MIT

//! The item level of the HID report descriptor format. This module splits a
//! report descriptor byte stream into its individual tag/length/value
//! components without interpreting them; building the device model out of the
//! resulting [DescriptorItem]s is the job of
//! [parse_report_descriptor](crate::parse_report_descriptor).
//!
//! In this document and unless stated otherwise, a reference to "Section a.b.c" refers to the
//! [HID Device Class Definition for HID 1.11](https://www.usb.org/document-library/device-class-definition-hid-111).

use crate::types::*;
use crate::{ensure, ParseError};

use bitflags::bitflags;
use tracing::debug;

type Result<T> = std::result::Result<T, ParseError>;

/// One value extracted from the (little endian) data bytes of a short item.
/// Short item payloads are 0, 1, 2 or 4 bytes; an empty payload reads as zero.
pub(crate) struct ItemValue {
    value: u32,
    nbytes: usize,
}

impl ItemValue {
    pub(crate) fn len(&self) -> usize {
        self.nbytes
    }
}

impl From<&[u8]> for ItemValue {
    fn from(bytes: &[u8]) -> ItemValue {
        let value = match bytes.len() {
            0 => 0,
            1 => bytes[0] as u32,
            2 => u16::from_le_bytes(bytes[0..2].try_into().unwrap()) as u32,
            _ => u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
        };
        ItemValue {
            value,
            nbytes: bytes.len(),
        }
    }
}

impl From<&ItemValue> for u32 {
    fn from(v: &ItemValue) -> u32 {
        v.value
    }
}

impl From<&ItemValue> for usize {
    fn from(v: &ItemValue) -> usize {
        v.value as usize
    }
}

impl From<&ItemValue> for u16 {
    fn from(v: &ItemValue) -> u16 {
        (v.value & 0xFFFF) as u16
    }
}

impl From<&ItemValue> for u8 {
    fn from(v: &ItemValue) -> u8 {
        (v.value & 0xFF) as u8
    }
}

impl From<&ItemValue> for i32 {
    /// Sign-extends based on the payload length the value was read from.
    fn from(v: &ItemValue) -> i32 {
        match v.len() {
            0 => 0,
            1 => ((v.value & 0xFF) as i8) as i32,
            2 => ((v.value & 0xFFFF) as i16) as i32,
            _ => v.value as i32,
        }
    }
}

bitflags! {
    /// The attribute flags of an Input, Output or Feature item, see Section
    /// 6.2.2.5. The raw bits are preserved as found in the descriptor,
    /// including any reserved bits a vendor may have set.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct MainFlags: u32 {
        const CONSTANT = 1 << 0;
        const VARIABLE = 1 << 1;
        const RELATIVE = 1 << 2;
        const WRAP = 1 << 3;
        const NONLINEAR = 1 << 4;
        const NO_PREFERRED_STATE = 1 << 5;
        const NULL_STATE = 1 << 6;
        /// Reserved on Input items.
        const VOLATILE = 1 << 7;
        const BUFFERED_BYTES = 1 << 8;

        const _ = !0;
    }
}

impl MainFlags {
    /// True if the data is constant and never changes. This typically means
    /// the field is padding and can be ignored.
    pub fn is_constant(&self) -> bool {
        self.contains(MainFlags::CONSTANT)
    }

    /// True if the field carries data. Mutually exclusive with
    /// [MainFlags::is_constant].
    pub fn is_data(&self) -> bool {
        !self.is_constant()
    }

    /// True if the field is a variable, false if it is an array.
    pub fn is_variable(&self) -> bool {
        self.contains(MainFlags::VARIABLE)
    }

    pub fn is_array(&self) -> bool {
        !self.is_variable()
    }

    /// True if the data is relative compared to a previous report.
    pub fn is_relative(&self) -> bool {
        self.contains(MainFlags::RELATIVE)
    }

    pub fn is_absolute(&self) -> bool {
        !self.is_relative()
    }

    /// True if the data wraps around at the logical minimum/maximum
    /// (e.g. a dial that can spin past 360 degrees).
    pub fn wraps(&self) -> bool {
        self.contains(MainFlags::WRAP)
    }

    /// True if the data was pre-processed on the device and the logical range
    /// is not linear.
    pub fn is_nonlinear(&self) -> bool {
        self.contains(MainFlags::NONLINEAR)
    }

    /// True if the control does not return to a preferred state when the user
    /// stops interacting with it.
    pub fn has_no_preferred_state(&self) -> bool {
        self.contains(MainFlags::NO_PREFERRED_STATE)
    }

    /// True if the control has a null state in which it does not send
    /// meaningful data (e.g. a joystick in its neutral position).
    pub fn has_null_state(&self) -> bool {
        self.contains(MainFlags::NULL_STATE)
    }

    /// True if the host should not change the value of this control.
    /// Reserved on Input items.
    pub fn is_volatile(&self) -> bool {
        self.contains(MainFlags::VOLATILE)
    }

    /// True if the control emits a fixed-size stream of bytes rather than a
    /// single bit field.
    pub fn is_buffered_bytes(&self) -> bool {
        self.contains(MainFlags::BUFFERED_BYTES)
    }
}

/// See Section 6.2.2.6. A collection groups several items together.
///
/// > A Collection item identifies a relationship between two or more data (Input,
/// > Output, or Feature.) For example, a mouse could be described as a collection of
/// > two to four data (x, y, button 1, button 2). While the Collection item opens a
/// > collection of data, the [MainItem::EndCollection] item closes a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionType {
    Physical,
    Application,
    Logical,
    Report,
    NamedArray,
    UsageSwitch,
    UsageModifier,
    Reserved { value: u8 },
    VendorDefined { value: u8 },
}

impl From<u8> for CollectionType {
    fn from(v: u8) -> CollectionType {
        match v {
            0x00 => CollectionType::Physical,
            0x01 => CollectionType::Application,
            0x02 => CollectionType::Logical,
            0x03 => CollectionType::Report,
            0x04 => CollectionType::NamedArray,
            0x05 => CollectionType::UsageSwitch,
            0x06 => CollectionType::UsageModifier,
            value @ 0x07..=0x7f => CollectionType::Reserved { value },
            value @ 0x80..=0xff => CollectionType::VendorDefined { value },
        }
    }
}

impl From<&CollectionType> for u8 {
    fn from(c: &CollectionType) -> u8 {
        match c {
            CollectionType::Physical => 0x00,
            CollectionType::Application => 0x01,
            CollectionType::Logical => 0x02,
            CollectionType::Report => 0x03,
            CollectionType::NamedArray => 0x04,
            CollectionType::UsageSwitch => 0x05,
            CollectionType::UsageModifier => 0x06,
            CollectionType::Reserved { value } => *value,
            CollectionType::VendorDefined { value } => *value,
        }
    }
}

/// Main Items, see Section 6.2.2.4
///
/// > Main items are used to either define or group certain types of data fields within a
/// > Report descriptor. There are two types of Main items: data and non-data. Data-
/// > type Main items are used to create a field within a report and include Input,
/// > Output, and Feature. Other items do not create fields and are subsequently
/// > referred to as non-data Main items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainItem {
    Input(MainFlags),
    Output(MainFlags),
    Feature(MainFlags),
    Collection(CollectionType),
    EndCollection,
}

/// See Section 6.2.2.7, a global item applies to all subsequently identified items.
///
/// > Global items describe rather than define data from a control. A new Main item
/// > assumes the characteristics of the item state table. Global items can change the
/// > state table. As a result Global item tags apply to all subsequently defined items
/// > unless overridden by another Global item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalItem {
    UsagePage(UsagePage),
    LogicalMinimum(LogicalMinimum),
    LogicalMaximum(LogicalMaximum),
    PhysicalMinimum(PhysicalMinimum),
    PhysicalMaximum(PhysicalMaximum),
    UnitExponent(UnitExponent),
    Unit(Unit),
    ReportSize(ReportSize),
    ReportId(ReportId),
    ReportCount(ReportCount),
    Push,
    Pop,
    Reserved,
}

/// See Section 6.2.2.8, a local item applies to the current [MainItem].
///
/// > Local item tags define characteristics of controls. These items do not carry over to
/// > the next Main item. If a Main item defines more than one control, it may be
/// > preceded by several similar Local item tags.
///
/// A Usage local item may or may not include a Usage Page in its upper 16
/// bits, depending on the payload size the device chose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalItem {
    /// A Usage item with a 4-byte payload: the MSB 16 bits are the Usage
    /// Page, the LSB 16 bits the Usage ID.
    Usage(UsagePage, UsageId),
    /// A Usage item with a 1- or 2-byte payload, no Usage Page included.
    UsageId(UsageId),
    UsageMinimum(UsageMinimum),
    UsageMaximum(UsageMaximum),
    DesignatorIndex(DesignatorIndex),
    DesignatorMinimum(DesignatorIndex),
    DesignatorMaximum(DesignatorIndex),
    StringIndex(StringIndex),
    StringMinimum(StringIndex),
    StringMaximum(StringIndex),
    Delimiter(Delimiter),
    /// The value is the upper 6 bits of the prefix byte (`byte[0] & 0xFC`).
    Reserved { value: u8 },
}

/// The type of a HID short item: one of [MainItem], [GlobalItem] or
/// [LocalItem]. Items of the reserved item type are kept as
/// [ItemType::Reserved] for forward compatibility, they never fail the parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    Main(MainItem),
    Global(GlobalItem),
    Local(LocalItem),
    Reserved,
}

impl MainItem {
    /// Interpret a complete short item (prefix byte plus payload) as a main
    /// item. Unknown main tags are reported as `None` and skipped by the
    /// caller.
    fn from_bytes(bytes: &[u8]) -> Option<MainItem> {
        let flags = MainFlags::from_bits_retain(u32::from(&ItemValue::from(&bytes[1..])));
        match bytes[0] & 0b11111100 {
            0b10000000 => Some(MainItem::Input(flags)),
            0b10010000 => Some(MainItem::Output(flags)),
            0b10110000 => Some(MainItem::Feature(flags)),
            0b10100000 => {
                let value = u8::from(&ItemValue::from(&bytes[1..]));
                Some(MainItem::Collection(CollectionType::from(value)))
            }
            0b11000000 => Some(MainItem::EndCollection),
            _ => None,
        }
    }
}

impl TryFrom<&[u8]> for GlobalItem {
    type Error = ParseError;

    fn try_from(bytes: &[u8]) -> Result<GlobalItem> {
        let value = ItemValue::from(&bytes[1..]);
        let item = match bytes[0] & 0b11111100 {
            0b00000100 => GlobalItem::UsagePage(UsagePage(u16::from(&value))),
            0b00010100 => GlobalItem::LogicalMinimum(LogicalMinimum(i32::from(&value))),
            // The maximum is sign-extended like the minimum. This misreads
            // descriptors that declare e.g. LogicalMaximum(255) in a single
            // byte, but those are broken per Section 6.2.2.7 and the
            // alternative misreads all negative maximums.
            0b00100100 => GlobalItem::LogicalMaximum(LogicalMaximum(i32::from(&value))),
            0b00110100 => GlobalItem::PhysicalMinimum(PhysicalMinimum(i32::from(&value))),
            0b01000100 => GlobalItem::PhysicalMaximum(PhysicalMaximum(i32::from(&value))),
            0b01010100 => GlobalItem::UnitExponent(UnitExponent(i32::from(&value))),
            0b01100100 => GlobalItem::Unit(Unit(u32::from(&value))),
            0b01110100 => GlobalItem::ReportSize(ReportSize(usize::from(&value))),
            0b10000100 => GlobalItem::ReportId(ReportId(u8::from(&value))),
            0b10010100 => GlobalItem::ReportCount(ReportCount(usize::from(&value))),
            0b10100100 => GlobalItem::Push,
            0b10110100 => GlobalItem::Pop,
            _ => GlobalItem::Reserved,
        };
        Ok(item)
    }
}

impl TryFrom<&[u8]> for LocalItem {
    type Error = ParseError;

    fn try_from(bytes: &[u8]) -> Result<LocalItem> {
        let value = ItemValue::from(&bytes[1..]);
        let item = match bytes[0] & 0b11111100 {
            0b00001000 => match value.len() {
                4 => LocalItem::Usage(
                    UsagePage((u32::from(&value) >> 16) as u16),
                    UsageId(u16::from(&value)),
                ),
                _ => LocalItem::UsageId(UsageId(u16::from(&value))),
            },
            0b00011000 => LocalItem::UsageMinimum(UsageMinimum(u32::from(&value))),
            0b00101000 => LocalItem::UsageMaximum(UsageMaximum(u32::from(&value))),
            0b00111000 => LocalItem::DesignatorIndex(DesignatorIndex(u32::from(&value))),
            0b01001000 => LocalItem::DesignatorMinimum(DesignatorIndex(u32::from(&value))),
            0b01011000 => LocalItem::DesignatorMaximum(DesignatorIndex(u32::from(&value))),
            0b01111000 => LocalItem::StringIndex(StringIndex(u32::from(&value))),
            0b10001000 => LocalItem::StringMinimum(StringIndex(u32::from(&value))),
            0b10011000 => LocalItem::StringMaximum(StringIndex(u32::from(&value))),
            0b10101000 => LocalItem::Delimiter(Delimiter(u32::from(&value))),
            value => LocalItem::Reserved { value },
        };
        Ok(item)
    }
}

impl TryFrom<&[u8]> for ItemType {
    type Error = ParseError;

    /// Interpret a complete short item, prefix byte plus payload bytes.
    /// The prefix byte is `tag:4 | type:2 | size:2`, see Section 6.2.2.2.
    fn try_from(bytes: &[u8]) -> Result<ItemType> {
        let itype = (bytes[0] & 0b1100) >> 2;
        match itype {
            0 => match MainItem::from_bytes(bytes) {
                Some(item) => Ok(ItemType::Main(item)),
                None => {
                    debug!("ignoring unknown main item tag {:#04x}", bytes[0]);
                    Ok(ItemType::Reserved)
                }
            },
            1 => Ok(ItemType::Global(GlobalItem::try_from(bytes)?)),
            2 => Ok(ItemType::Local(LocalItem::try_from(bytes)?)),
            _ => Ok(ItemType::Reserved),
        }
    }
}

/// A single short item split out of a report descriptor, not yet interpreted
/// against the global/local item state.
#[derive(Debug)]
pub struct DescriptorItem {
    offset: usize,
    size: usize,
    item_type: ItemType,
}

impl DescriptorItem {
    /// The byte offset of this item in the report descriptor it was
    /// extracted from.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The length of this item in bytes, including the prefix byte.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn item_type(&self) -> ItemType {
        self.item_type
    }
}

/// Split a report descriptor byte stream into its short items, left to right.
///
/// An item whose declared payload runs past the end of the buffer fails with
/// [ParseError::TruncatedDescriptor]; nothing is returned for a truncated
/// stream.
pub fn itemize(bytes: &[u8]) -> Result<Vec<DescriptorItem>> {
    let mut offset = 0;
    let mut items = Vec::new();
    while offset < bytes.len() {
        let prefix = bytes[offset];
        let payload = match prefix & 0b0011 {
            3 => 4,
            n => n as usize,
        };
        ensure!(
            offset + payload < bytes.len(),
            ParseError::TruncatedDescriptor { offset }
        );
        let item_type = ItemType::try_from(&bytes[offset..offset + payload + 1])?;
        items.push(DescriptorItem {
            offset,
            size: payload + 1,
            item_type,
        });
        offset += payload + 1;
    }
    Ok(items)
}
