//! `#[derive(Label)]` as used for log fields.

use remora::{EntryKind, Label, MessageType, view::InputEvent};

#[derive(Label)]
#[allow(dead_code)]
enum Probe {
    Idle,
    Attached(u8, String),
    Streaming { view: String, frames: u64 },
}

#[test]
fn test_unit_variant() {
    assert_eq!(Probe::Idle.label(), "Idle");
    assert_eq!(EntryKind::Selection.label(), "Selection");
}

#[test]
fn test_tuple_variant() {
    assert_eq!(Probe::Attached(1, "tree".into()).label(), "Attached");
}

#[test]
fn test_struct_variant() {
    let streaming = Probe::Streaming {
        view: "canvas".into(),
        frames: 3,
    };
    assert_eq!(streaming.label(), "Streaming");
    let wheel = InputEvent::Wheel {
        x: 0,
        y: 0,
        delta_x: 0,
        delta_y: 120,
        buttons: 0,
        modifiers: 0,
    };
    assert_eq!(wheel.label(), "Wheel");
}

#[test]
fn test_message_types_log_by_name() {
    assert_eq!(MessageType::ModelRowsAdded.label(), "ModelRowsAdded");
}
