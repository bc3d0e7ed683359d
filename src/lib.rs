// SPDX-License-Identifier: MIT

//! A parser for HID report descriptors and a bit-level codec for the reports
//! they describe.
//!
//! A report descriptor is a self-describing tag/length/value byte stream, see
//! Section 6.2.2 of the [HID Device Class Definition for HID
//! 1.11](https://www.usb.org/document-library/device-class-definition-hid-111).
//! Parsing one yields a [DeviceDescriptor]: a tree of [Collection]s and, in
//! declaration order, the flat sequence of [Element]s that make up the
//! device's reports. The codec in [report] then unpacks raw input/feature
//! report buffers into the elements' values and packs element values back
//! into output report buffers, keyed by report ID.
//!
//! ```
//! # use hidcodec::*;
//! let bytes: &[u8] = &[
//!     0x05, 0x01,       // Usage Page (Generic Desktop)
//!     0x09, 0x02,       // Usage (Mouse)
//!     0xa1, 0x01,       // Collection (Application)
//!     0x75, 0x08,       //   Report Size (8)
//!     0x95, 0x03,       //   Report Count (3)
//!     0x15, 0x00,       //   Logical Minimum (0)
//!     0x26, 0xff, 0x00, //   Logical Maximum (255)
//!     0x81, 0x02,       //   Input (Data,Var,Abs)
//!     0xc0,             // End Collection
//! ];
//! let descriptor = DeviceDescriptor::try_from(bytes).unwrap();
//! assert_eq!(descriptor.num_elements(), 3);
//! ```
//!
//! Parsing is a pure function of the input bytes. Decoding and encoding
//! mutate the element values in place, so a single device session must
//! serialize its codec calls; give concurrent sessions their own
//! [DeviceDescriptor] each.

use thiserror::Error;
use tracing::{debug, trace};

pub mod device;
pub mod hid;
pub mod report;
pub mod types;

use hid::{CollectionType, GlobalItem, ItemType, LocalItem, MainFlags, MainItem};
pub use types::*;

macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !$cond {
            return Err($err);
        }
    };
}
pub(crate) use ensure;

/// Upper bound on the number of enumerated Usage items between two main
/// items. Exceeding it is [ParseError::UsageListOverflow].
pub const MAX_ENUMERATED_USAGES: usize = 256;

#[derive(Error, Debug)]
pub enum ParseError {
    /// An item's declared payload runs past the end of the buffer, or a
    /// collection was left open at the end of the descriptor.
    #[error("descriptor is truncated at offset {offset}")]
    TruncatedDescriptor { offset: usize },
    /// More than [MAX_ENUMERATED_USAGES] Usage items before a main item.
    #[error("more than {MAX_ENUMERATED_USAGES} usages declared before a main item")]
    UsageListOverflow,
    /// An End Collection item without a matching open collection.
    #[error("end collection at offset {offset} without an open collection")]
    UnbalancedEndCollection { offset: usize },
    /// A main item was emitted with a Report Size above 32 bits.
    #[error("report size of {bits} bits exceeds the supported 32 bits")]
    UnsupportedReportSize { bits: usize },
}

type Result<T> = std::result::Result<T, ParseError>;

/// The direction of a report and of the elements within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
    Feature,
}

/// Index of an [Element] in its [DeviceDescriptor]'s element sequence.
/// Identical to the element's position in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(pub(crate) usize);

impl From<ElementId> for usize {
    fn from(id: ElementId) -> usize {
        id.0
    }
}

/// Index of a [Collection] in its [DeviceDescriptor]. Id 0 is the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollectionId(pub(crate) usize);

impl CollectionId {
    /// The synthetic root collection owning the whole tree.
    pub const ROOT: CollectionId = CollectionId(0);
}

impl From<CollectionId> for usize {
    fn from(id: CollectionId) -> usize {
        id.0
    }
}

/// One scalar or bitfield slot within a report, as declared by one repetition
/// of an Input, Output or Feature main item.
#[derive(Debug, Clone)]
pub struct Element {
    index: usize,
    direction: Direction,
    flags: MainFlags,
    usage_page: UsagePage,
    usage: u32,
    logical_min: i32,
    logical_max: i32,
    phys_min: i32,
    phys_max: i32,
    unit: u32,
    unit_exponent: i32,
    report_size: usize,
    report_id: ReportId,
    report_index: usize,
    parent: CollectionId,
    pub(crate) value: u32,
}

impl Element {
    /// Position in the global element sequence, stable for the lifetime of
    /// the descriptor and identical to declaration order.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The raw attribute flags of the main item that declared this element.
    pub fn flags(&self) -> MainFlags {
        self.flags
    }

    pub fn usage_page(&self) -> UsagePage {
        self.usage_page
    }

    /// The resolved usage: `usage_min + report_index` when the declaring item
    /// carried a usage range, otherwise the matching entry of the enumerated
    /// usage list (the last entry if the list was shorter than the report
    /// count, zero if no usage was declared at all).
    pub fn usage(&self) -> u32 {
        self.usage
    }

    pub fn logical_minimum(&self) -> i32 {
        self.logical_min
    }

    pub fn logical_maximum(&self) -> i32 {
        self.logical_max
    }

    /// The physical minimum, defaulted to the logical minimum when the
    /// descriptor declared physical min = max = 0.
    pub fn physical_minimum(&self) -> i32 {
        self.phys_min
    }

    pub fn physical_maximum(&self) -> i32 {
        self.phys_max
    }

    pub fn unit(&self) -> u32 {
        self.unit
    }

    pub fn unit_exponent(&self) -> i32 {
        self.unit_exponent
    }

    /// Width of this element in bits, 1..=32.
    pub fn report_size(&self) -> usize {
        self.report_size
    }

    /// The report this element belongs to, [ReportId::NONE] if the descriptor
    /// never declared a Report ID.
    pub fn report_id(&self) -> ReportId {
        self.report_id
    }

    /// This element's 0-based ordinal among the repetitions emitted by the
    /// same main item.
    pub fn report_index(&self) -> usize {
        self.report_index
    }

    /// The collection that was open when this element was declared.
    pub fn parent(&self) -> CollectionId {
        self.parent
    }

    /// The last decoded (or to-be-encoded) raw field value, sign-agnostic
    /// storage of up to 32 bits. See [Element::signed_value] for the
    /// sign-extended interpretation.
    pub fn value(&self) -> u32 {
        self.value
    }

    /// Set the value the output encoder will pack for this element,
    /// truncated to the element's bit width.
    pub fn set_value(&mut self, value: u32) {
        self.value = if self.report_size >= 32 {
            value
        } else {
            value & ((1 << self.report_size) - 1)
        };
    }
}

/// One nesting scope of the descriptor, see Section 6.2.2.6.
///
/// Collections own their immediate child collections and the elements
/// declared while they were the innermost open scope.
#[derive(Debug, Clone)]
pub struct Collection {
    collection_type: CollectionType,
    usage_page: UsagePage,
    usage: u32,
    parent: Option<CollectionId>,
    children: Vec<CollectionId>,
    elements: Vec<ElementId>,
}

impl Collection {
    pub fn collection_type(&self) -> CollectionType {
        self.collection_type
    }

    /// The usage page in effect when this collection opened.
    pub fn usage_page(&self) -> UsagePage {
        self.usage_page
    }

    /// The usage in effect when this collection opened.
    pub fn usage(&self) -> u32 {
        self.usage
    }

    /// The enclosing collection, `None` for the root.
    pub fn parent(&self) -> Option<CollectionId> {
        self.parent
    }

    /// Immediate child collections, in declaration order.
    pub fn collections(&self) -> &[CollectionId] {
        &self.children
    }

    /// Elements owned directly by this collection, in declaration order.
    pub fn elements(&self) -> &[ElementId] {
        &self.elements
    }

    /// Number of elements owned directly by this collection.
    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    /// Number of immediate child collections.
    pub fn num_collections(&self) -> usize {
        self.children.len()
    }
}

/// Total Output bits accumulated for one report ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportLayout {
    id: ReportId,
    output_bits: usize,
}

impl ReportLayout {
    pub fn id(&self) -> ReportId {
        self.id
    }

    /// Summed bit width of all Output elements declared for this report ID.
    pub fn output_bits(&self) -> usize {
        self.output_bits
    }
}

/// The parsed model of one report descriptor: the collection tree, the flat
/// element sequence threaded through it, and the per-report-ID table of
/// Output bit lengths.
///
/// The topology is immutable once parsed; only the element values mutate,
/// through the codec in [report](crate::report).
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub(crate) collections: Vec<Collection>,
    pub(crate) elements: Vec<Element>,
    reports: Vec<ReportLayout>,
}

impl DeviceDescriptor {
    fn new() -> Self {
        DeviceDescriptor {
            // The root is synthetic: it is not declared by any item and
            // carries no meaningful type or usage of its own.
            collections: vec![Collection {
                collection_type: CollectionType::Physical,
                usage_page: UsagePage(0),
                usage: 0,
                parent: None,
                children: vec![],
                elements: vec![],
            }],
            elements: vec![],
            // Report ID 0 is the implicit "no report ID" row and always present.
            reports: vec![ReportLayout {
                id: ReportId::NONE,
                output_bits: 0,
            }],
        }
    }

    /// The synthetic device collection owning the entire tree.
    pub fn root(&self) -> &Collection {
        &self.collections[0]
    }

    pub fn collection(&self, id: CollectionId) -> &Collection {
        &self.collections[id.0]
    }

    pub fn element(&self, id: ElementId) -> &Element {
        &self.elements[id.0]
    }

    /// Mutable access to one element, for staging output values before
    /// encoding. The topology itself stays immutable.
    pub fn element_mut(&mut self, id: ElementId) -> &mut Element {
        &mut self.elements[id.0]
    }

    /// All elements across all collections, in declaration order.
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Grand total of elements in the tree.
    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    /// Grand total of collections in the tree, excluding the synthetic root.
    pub fn num_collections(&self) -> usize {
        self.collections.len() - 1
    }

    /// The per-report-ID table, ids in first-seen order with id 0 first.
    pub fn report_layouts(&self) -> &[ReportLayout] {
        &self.reports
    }

    /// Total Output bits for the given report ID, `None` if the id never
    /// appeared in the descriptor.
    pub fn output_bits(&self, id: ReportId) -> Option<usize> {
        self.reports.iter().find(|r| r.id == id).map(|r| r.output_bits)
    }

    fn add_output_bits(&mut self, id: ReportId, bits: usize) {
        match self.reports.iter_mut().find(|r| r.id == id) {
            Some(row) => row.output_bits += bits,
            None => self.reports.push(ReportLayout {
                id,
                output_bits: bits,
            }),
        }
    }
}

impl TryFrom<&[u8]> for DeviceDescriptor {
    type Error = ParseError;

    fn try_from(bytes: &[u8]) -> Result<DeviceDescriptor> {
        parse_report_descriptor(bytes)
    }
}

/// The accumulated global/local item state applied whenever a main item is
/// emitted, plus the stack of open collections. One value of this type is
/// threaded through the parse loop; nothing of it survives the parse.
#[derive(Debug)]
struct ParserContext {
    usage_page: UsagePage,
    /// The most recent Usage item, retained for collections independently of
    /// the enumerated list below.
    current_usage: u32,
    /// Usages enumerated since the last main item, in declaration order.
    usages: Vec<u32>,
    /// A pending Usage Minimum/Maximum pair. Mutually exclusive with the
    /// enumerated list: a new Usage item discards a pending range.
    usage_min: Option<u32>,
    usage_max: Option<u32>,
    logical_min: i32,
    logical_max: i32,
    phys_min: i32,
    phys_max: i32,
    unit: u32,
    unit_exponent: i32,
    report_size: usize,
    report_count: usize,
    /// Sticky: a Report ID item changes the ambient id for all subsequent
    /// main items until changed again.
    report_id: ReportId,
    /// Stack of open collections, never empty; index 0 is the root.
    collections: Vec<CollectionId>,
}

impl ParserContext {
    fn new() -> Self {
        ParserContext {
            usage_page: UsagePage(0),
            current_usage: 0,
            usages: Vec::new(),
            usage_min: None,
            usage_max: None,
            logical_min: 0,
            logical_max: 0,
            phys_min: 0,
            phys_max: 0,
            unit: 0,
            unit_exponent: 0,
            report_size: 0,
            report_count: 0,
            report_id: ReportId::NONE,
            collections: vec![CollectionId::ROOT],
        }
    }

    fn active_collection(&self) -> CollectionId {
        *self
            .collections
            .last()
            .unwrap_or(&CollectionId::ROOT)
    }

    fn push_usage(&mut self, usage: u32) -> Result<()> {
        ensure!(
            self.usages.len() < MAX_ENUMERATED_USAGES,
            ParseError::UsageListOverflow
        );
        self.usages.push(usage);
        self.current_usage = usage;
        // A freshly enumerated usage discards a pending range.
        self.usage_min = None;
        self.usage_max = None;
        Ok(())
    }

    /// Resolve the usage of the j-th element of a main item: the usage range
    /// wins over the enumerated list, a too-short list repeats its last
    /// entry, and an element without any declared usage resolves to zero.
    /// A report count running past the end of a declared range repeats the
    /// range maximum, like the repeated last entry of an enumerated list.
    fn resolve_usage(&self, index: usize) -> u32 {
        if let Some(min) = self.usage_min {
            let usage = min.saturating_add(index as u32);
            return match self.usage_max {
                Some(max) if usage > max => max,
                _ => usage,
            };
        }
        self.usages
            .get(index)
            .or_else(|| self.usages.last())
            .copied()
            .unwrap_or(0)
    }

    /// Local item state does not carry over to the next main item.
    fn clear_locals(&mut self) {
        self.usages.clear();
        self.usage_min = None;
        self.usage_max = None;
    }
}

fn handle_main_item(
    descriptor: &mut DeviceDescriptor,
    ctx: &mut ParserContext,
    direction: Direction,
    flags: MainFlags,
) -> Result<()> {
    ensure!(
        ctx.report_size <= 32,
        ParseError::UnsupportedReportSize {
            bits: ctx.report_size
        }
    );

    // Physical min = max = 0 means "not declared", not a zero-width range.
    let (phys_min, phys_max) = if ctx.phys_min == 0 && ctx.phys_max == 0 {
        (ctx.logical_min, ctx.logical_max)
    } else {
        (ctx.phys_min, ctx.phys_max)
    };

    let parent = ctx.active_collection();
    for j in 0..ctx.report_count {
        let index = descriptor.elements.len();
        trace!(
            index,
            ?direction,
            usage_page = ctx.usage_page.0,
            usage = ctx.resolve_usage(j),
            report_size = ctx.report_size,
            report_id = ctx.report_id.0,
            "emitting element"
        );
        descriptor.elements.push(Element {
            index,
            direction,
            flags,
            usage_page: ctx.usage_page,
            usage: ctx.resolve_usage(j),
            logical_min: ctx.logical_min,
            logical_max: ctx.logical_max,
            phys_min,
            phys_max,
            unit: ctx.unit,
            unit_exponent: ctx.unit_exponent,
            report_size: ctx.report_size,
            report_id: ctx.report_id,
            report_index: j,
            parent,
            value: 0,
        });
        descriptor.collections[parent.0]
            .elements
            .push(ElementId(index));
        if direction == Direction::Output {
            descriptor.add_output_bits(ctx.report_id, ctx.report_size);
        }
    }

    ctx.clear_locals();
    Ok(())
}

/// Parse a report descriptor into its [DeviceDescriptor] model.
///
/// This is a single pass over the item stream. Errors abort the whole parse;
/// no partial model is ever returned.
pub fn parse_report_descriptor(bytes: &[u8]) -> Result<DeviceDescriptor> {
    let items = hid::itemize(bytes)?;

    let mut descriptor = DeviceDescriptor::new();
    let mut ctx = ParserContext::new();

    for item in &items {
        match item.item_type() {
            ItemType::Main(MainItem::Collection(collection_type)) => {
                let parent = ctx.active_collection();
                let id = CollectionId(descriptor.collections.len());
                descriptor.collections.push(Collection {
                    collection_type,
                    usage_page: ctx.usage_page,
                    usage: ctx.current_usage,
                    parent: Some(parent),
                    children: vec![],
                    elements: vec![],
                });
                descriptor.collections[parent.0].children.push(id);
                ctx.collections.push(id);
            }
            ItemType::Main(MainItem::EndCollection) => {
                match ctx.collections.pop() {
                    Some(id) if !ctx.collections.is_empty() => {
                        // Restore the usage context recorded when the closing
                        // collection opened. Not part of the HID spec, but
                        // descriptors in the wild rely on it.
                        let closed = &descriptor.collections[id.0];
                        ctx.usage_page = closed.usage_page;
                        ctx.current_usage = closed.usage;
                    }
                    _ => {
                        return Err(ParseError::UnbalancedEndCollection {
                            offset: item.offset(),
                        })
                    }
                }
            }
            ItemType::Main(MainItem::Input(flags)) => {
                handle_main_item(&mut descriptor, &mut ctx, Direction::Input, flags)?;
            }
            ItemType::Main(MainItem::Output(flags)) => {
                handle_main_item(&mut descriptor, &mut ctx, Direction::Output, flags)?;
            }
            ItemType::Main(MainItem::Feature(flags)) => {
                handle_main_item(&mut descriptor, &mut ctx, Direction::Feature, flags)?;
            }
            ItemType::Global(GlobalItem::UsagePage(usage_page)) => {
                ctx.usage_page = usage_page;
            }
            ItemType::Global(GlobalItem::LogicalMinimum(minimum)) => {
                ctx.logical_min = minimum.into();
            }
            ItemType::Global(GlobalItem::LogicalMaximum(maximum)) => {
                ctx.logical_max = maximum.into();
            }
            ItemType::Global(GlobalItem::PhysicalMinimum(minimum)) => {
                ctx.phys_min = minimum.into();
            }
            ItemType::Global(GlobalItem::PhysicalMaximum(maximum)) => {
                ctx.phys_max = maximum.into();
            }
            ItemType::Global(GlobalItem::UnitExponent(exponent)) => {
                ctx.unit_exponent = exponent.into();
            }
            ItemType::Global(GlobalItem::Unit(unit)) => {
                ctx.unit = unit.into();
            }
            ItemType::Global(GlobalItem::ReportSize(size)) => {
                ctx.report_size = size.into();
            }
            ItemType::Global(GlobalItem::ReportId(id)) => {
                ctx.report_id = id;
            }
            ItemType::Global(GlobalItem::ReportCount(count)) => {
                ctx.report_count = count.into();
            }
            ItemType::Global(GlobalItem::Push) | ItemType::Global(GlobalItem::Pop) => {
                // Accepted without a modeled state stack.
                debug!(offset = item.offset(), "ignoring global Push/Pop item");
            }
            ItemType::Global(GlobalItem::Reserved) => {
                debug!(offset = item.offset(), "ignoring reserved global item");
            }
            ItemType::Local(LocalItem::Usage(usage_page, usage_id)) => {
                // A 4-byte Usage carries its own page in the upper 16 bits;
                // the combined value is what the element records.
                let usage = (u32::from(u16::from(usage_page)) << 16) | u32::from(u16::from(usage_id));
                ctx.push_usage(usage)?;
            }
            ItemType::Local(LocalItem::UsageId(usage_id)) => {
                ctx.push_usage(u32::from(u16::from(usage_id)))?;
            }
            ItemType::Local(LocalItem::UsageMinimum(minimum)) => {
                ctx.usage_min = Some(minimum.into());
            }
            ItemType::Local(LocalItem::UsageMaximum(maximum)) => {
                ctx.usage_max = Some(maximum.into());
            }
            ItemType::Local(
                LocalItem::DesignatorIndex(_)
                | LocalItem::DesignatorMinimum(_)
                | LocalItem::DesignatorMaximum(_)
                | LocalItem::StringIndex(_)
                | LocalItem::StringMinimum(_)
                | LocalItem::StringMaximum(_)
                | LocalItem::Delimiter(_),
            ) => {
                debug!(offset = item.offset(), "ignoring designator/string local item");
            }
            ItemType::Local(LocalItem::Reserved { value }) => {
                debug!(
                    offset = item.offset(),
                    value, "ignoring reserved local item"
                );
            }
            ItemType::Reserved => {
                debug!(offset = item.offset(), "ignoring reserved item");
            }
        }
    }

    ensure!(
        ctx.collections.len() == 1,
        ParseError::TruncatedDescriptor {
            offset: bytes.len()
        }
    );

    Ok(descriptor)
}
