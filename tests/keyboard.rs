// SPDX-License-Identifier: MIT

//! End-to-end run over a keyboard descriptor recorded from a Microsoft
//! 2.4GHz Transceiver v9.0: parse, decode an input and a feature report,
//! encode an LED output report and push it through a fake transport.

use std::io;

use hidcodec::device::{read_device_descriptor, send_output_report, DeviceFacade};
use hidcodec::hid::CollectionType;
use hidcodec::report::{decode_feature_report, decode_input_report, ReportHandler};
use hidcodec::{DeviceDescriptor, Direction, Element, ReportId, UsagePage};

#[rustfmt::skip]
const KEYBOARD_DESCRIPTOR: &[u8] = &[
    0x05, 0x01,       // Usage Page (Generic Desktop)
    0x09, 0x06,       // Usage (Keyboard)
    0xa1, 0x01,       // Collection (Application)
    0x05, 0x08,       //   Usage Page (LED)
    0x19, 0x01,       //   Usage Minimum (1)
    0x29, 0x03,       //   Usage Maximum (3)
    0x15, 0x00,       //   Logical Minimum (0)
    0x25, 0x01,       //   Logical Maximum (1)
    0x75, 0x01,       //   Report Size (1)
    0x95, 0x03,       //   Report Count (3)
    0x91, 0x02,       //   Output (Data,Var,Abs)
    0x95, 0x05,       //   Report Count (5)
    0x91, 0x01,       //   Output (Cnst,Arr,Abs)
    0x05, 0x07,       //   Usage Page (Keyboard/Keypad)
    0x19, 0xe0,       //   Usage Minimum (224)
    0x29, 0xe7,       //   Usage Maximum (231)
    0x95, 0x08,       //   Report Count (8)
    0x81, 0x02,       //   Input (Data,Var,Abs)
    0x75, 0x08,       //   Report Size (8)
    0x95, 0x01,       //   Report Count (1)
    0x81, 0x01,       //   Input (Cnst,Arr,Abs)
    0x19, 0x00,       //   Usage Minimum (0)
    0x29, 0x91,       //   Usage Maximum (145)
    0x26, 0xff, 0x00, //   Logical Maximum (255)
    0x95, 0x06,       //   Report Count (6)
    0x81, 0x00,       //   Input (Data,Arr,Abs)
    0x05, 0x0c,       //   Usage Page (Consumer)
    0x0a, 0xc0, 0x02, //   Usage (Extended Keyboard Attributes Collection)
    0xa1, 0x02,       //   Collection (Logical)
    0x1a, 0xc1, 0x02, //     Usage Minimum (705)
    0x2a, 0xc6, 0x02, //     Usage Maximum (710)
    0x95, 0x06,       //     Report Count (6)
    0xb1, 0x03,       //     Feature (Cnst,Var,Abs)
    0xc0,             //   End Collection
    0xc0,             // End Collection
];

fn parse() -> DeviceDescriptor {
    DeviceDescriptor::try_from(KEYBOARD_DESCRIPTOR).unwrap()
}

#[test]
fn keyboard_topology() {
    let descriptor = parse();
    assert_eq!(descriptor.num_collections(), 2);
    assert_eq!(descriptor.num_elements(), 29);

    let app = descriptor.collection(descriptor.root().collections()[0]);
    assert_eq!(app.collection_type(), CollectionType::Application);
    assert_eq!(app.usage_page(), UsagePage(0x01));
    assert_eq!(app.usage(), 0x06);
    assert_eq!(app.num_elements(), 23);
    assert_eq!(app.num_collections(), 1);

    let logical = descriptor.collection(app.collections()[0]);
    assert_eq!(logical.collection_type(), CollectionType::Logical);
    assert_eq!(logical.usage_page(), UsagePage(0x0c));
    assert_eq!(logical.usage(), 0x02c0);
    assert_eq!(logical.num_elements(), 6);

    // LED outputs carry the range-expanded usages, the constant padding
    // after them carries none
    let outputs: Vec<&Element> = descriptor
        .elements()
        .iter()
        .filter(|e| e.direction() == Direction::Output)
        .collect();
    assert_eq!(outputs.len(), 8);
    let usages: Vec<u32> = outputs.iter().map(|e| e.usage()).collect();
    assert_eq!(usages, vec![1, 2, 3, 0, 0, 0, 0, 0]);
    assert!(outputs[0].flags().is_variable());
    assert!(outputs[3].flags().is_constant());
    assert_eq!(outputs[0].usage_page(), UsagePage(0x08));

    // Modifier keys expand from the usage range on the keypad page
    let modifiers: Vec<&Element> = descriptor
        .elements()
        .iter()
        .filter(|e| e.direction() == Direction::Input && e.report_size() == 1)
        .collect();
    assert_eq!(modifiers.len(), 8);
    assert_eq!(modifiers[0].usage(), 224);
    assert_eq!(modifiers[7].usage(), 231);
    assert_eq!(modifiers[0].usage_page(), UsagePage(0x07));

    // Feature elements live in the nested logical collection
    let features: Vec<&Element> = descriptor
        .elements()
        .iter()
        .filter(|e| e.direction() == Direction::Feature)
        .collect();
    assert_eq!(features.len(), 6);
    assert_eq!(features[0].usage(), 705);
    assert_eq!(features[5].usage(), 710);
    assert!(features
        .iter()
        .all(|e| e.parent() == app.collections()[0]));

    // No Report ID items: everything accumulates on the implicit id
    assert_eq!(descriptor.report_layouts().len(), 1);
    assert_eq!(descriptor.output_bits(ReportId::NONE), Some(8));
}

#[derive(Default)]
struct Recorder {
    values: Vec<u32>,
    reports: usize,
}

impl ReportHandler for Recorder {
    fn element(&mut self, element: &Element) {
        self.values.push(element.value());
    }

    fn report(&mut self, _descriptor: &DeviceDescriptor) {
        self.reports += 1;
    }
}

#[test]
fn keyboard_input_report() {
    let mut descriptor = parse();
    // Left shift (bit 1) held, keys 0x04 0x05 pressed
    let buffer = [0b0000_0010, 0x00, 0x04, 0x05, 0x00, 0x00, 0x00, 0x00];
    let mut recorder = Recorder::default();
    decode_input_report(&buffer, &mut descriptor, &mut recorder).unwrap();
    assert_eq!(recorder.reports, 1);
    assert_eq!(recorder.values.len(), 15);

    let inputs: Vec<&Element> = descriptor
        .elements()
        .iter()
        .filter(|e| e.direction() == Direction::Input)
        .collect();
    let modifier_bits: Vec<u32> = inputs[..8].iter().map(|e| e.value()).collect();
    assert_eq!(modifier_bits, vec![0, 1, 0, 0, 0, 0, 0, 0]);
    assert_eq!(inputs[9].value(), 0x04);
    assert_eq!(inputs[10].value(), 0x05);
    assert_eq!(inputs[11].value(), 0x00);

    // Feature elements stay untouched by an input decode
    assert!(descriptor
        .elements()
        .iter()
        .filter(|e| e.direction() == Direction::Feature)
        .all(|e| e.value() == 0));
}

#[test]
fn keyboard_feature_report() {
    let mut descriptor = parse();
    let buffer = [0x10, 0x20, 0x30, 0x40, 0x50, 0x60];
    decode_feature_report(&buffer, &mut descriptor, &mut ()).unwrap();
    let features: Vec<u32> = descriptor
        .elements()
        .iter()
        .filter(|e| e.direction() == Direction::Feature)
        .map(|e| e.value())
        .collect();
    assert_eq!(features, vec![0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);
}

struct MemoryDevice {
    descriptor: Vec<u8>,
    written: Vec<Vec<u8>>,
}

impl DeviceFacade for MemoryDevice {
    fn read_report_descriptor(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.descriptor.len().min(buf.len());
        buf[..len].copy_from_slice(&self.descriptor[..len]);
        Ok(len)
    }

    fn write_report(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.written.push(bytes.to_vec());
        Ok(bytes.len())
    }
}

#[test]
fn keyboard_led_output_through_facade() {
    let mut device = MemoryDevice {
        descriptor: KEYBOARD_DESCRIPTOR.to_vec(),
        written: vec![],
    };
    let mut descriptor = read_device_descriptor(&mut device).unwrap();
    assert_eq!(descriptor.num_elements(), 29);

    // Num lock and scroll lock on, caps lock off
    let root = descriptor.root().collections()[0];
    let led_ids: Vec<_> = descriptor
        .collection(root)
        .elements()
        .iter()
        .copied()
        .filter(|id| {
            let e = descriptor.element(*id);
            e.direction() == Direction::Output && e.flags().is_variable()
        })
        .collect();
    assert_eq!(led_ids.len(), 3);
    for (id, on) in led_ids.into_iter().zip([true, false, true]) {
        descriptor.element_mut(id).set_value(u32::from(on));
    }

    let n = send_output_report(&mut device, &descriptor, ReportId::NONE).unwrap();
    assert_eq!(n, 1);
    assert_eq!(device.written, vec![vec![0b0000_0101]]);
}
