use kuka_c3::errors::{C3Error, C3ErrorCode};
use kuka_c3::messages::wire::put_utf16;
use kuka_c3::messages::{C3Message, C3MessageType, C3VariableName};

/// Builds the response frame a robot would send for a multiple read/write,
/// mirroring the codec from the other side of the wire.
fn multiple_response(tag: u16, message_type: u8, values: &[&str]) -> Vec<u8> {
    let mut frame = Vec::new();
    frame.extend_from_slice(&tag.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.push(message_type);
    frame.push(values.len() as u8);
    for value in values {
        frame.push(1); // per-variable Success
        put_utf16(&mut frame, value);
    }
    frame.extend_from_slice(&1u16.to_be_bytes()); // global Success
    frame.push(1);

    let body_len = (frame.len() - 4) as u16;
    frame[2..4].copy_from_slice(&body_len.to_be_bytes());
    frame
}

fn single_response(tag: u16, message_type: u8, value: &str) -> Vec<u8> {
    let mut frame = Vec::new();
    frame.extend_from_slice(&tag.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.push(message_type);
    put_utf16(&mut frame, value);
    frame.extend_from_slice(&1u16.to_be_bytes());
    frame.push(1);

    let body_len = (frame.len() - 4) as u16;
    frame[2..4].copy_from_slice(&body_len.to_be_bytes());
    frame
}

#[test]
fn multiple_read_preserves_count_order_and_names() {
    let names = [
        C3VariableName::AxisAct,
        C3VariableName::PosAct,
        C3VariableName::ComAction,
        C3VariableName::ComRoundm,
    ];
    let mut message = C3Message::read(77, &names).unwrap();
    assert_eq!(message.message_type(), C3MessageType::ReadMultiple);

    let frame = multiple_response(77, 6, &["{E6AXIS: A1 0.00000}", "{E6POS: X 0.00000}", "1", "-1"]);
    message.decode_response(&frame).unwrap();
    message.status().unwrap();

    let variables = message.variables();
    assert_eq!(variables.len(), 4);
    for (variable, name) in variables.iter().zip(names.iter()) {
        assert_eq!(variable.name, *name);
        assert_eq!(variable.error_code, C3ErrorCode::Success);
        assert!(variable.value.is_some());
    }
    assert_eq!(variables[2].value.as_deref(), Some("1"));
    assert_eq!(variables[3].value.as_deref(), Some("-1"));
}

#[test]
fn write_multiple_request_layout() {
    let message = C3Message::write(
        3,
        vec![
            (C3VariableName::ComE6Axis, "{E6AXIS: A1 1.00000}".to_string()),
            (C3VariableName::ComRoundm, "-1".to_string()),
        ],
    )
    .unwrap();
    assert_eq!(message.message_type(), C3MessageType::WriteMultiple);

    let frame = message.encode().unwrap();
    assert_eq!(&frame[0..2], &[0x00, 0x03]);
    assert_eq!(
        u16::from_be_bytes([frame[2], frame[3]]) as usize,
        frame.len() - 4
    );
    assert_eq!(frame[4], 7);
    assert_eq!(frame[5], 2); // variable count

    // First name: "COM_E6AXIS", 10 UTF-16 units, little-endian.
    assert_eq!(u16::from_be_bytes([frame[6], frame[7]]), 10);
    assert_eq!(&frame[8..12], &[b'C', 0, b'O', 0]);
}

#[test]
fn response_with_wrong_variable_count_is_rejected() {
    let mut message =
        C3Message::read(9, &[C3VariableName::AxisAct, C3VariableName::PosAct]).unwrap();
    let frame = multiple_response(9, 6, &["a", "b", "c"]);
    assert!(matches!(
        message.decode_response(&frame),
        Err(C3Error::Decode(_))
    ));
}

#[test]
fn response_with_wrong_type_is_rejected() {
    let mut message = C3Message::read(9, &[C3VariableName::AxisAct]).unwrap();
    let frame = single_response(9, 5, "x");
    assert!(matches!(
        message.decode_response(&frame),
        Err(C3Error::TypeMismatch { .. })
    ));
}

#[test]
fn single_write_round_trip() {
    let mut message =
        C3Message::write(41, vec![(C3VariableName::ComAction, "2".to_string())]).unwrap();
    let frame = single_response(41, 5, "2");
    message.decode_response(&frame).unwrap();
    message.status().unwrap();
    assert_eq!(message.variables()[0].value.as_deref(), Some("2"));
}

#[test]
fn error_code_response_fails_status() {
    let mut message = C3Message::read(12, &[C3VariableName::AxisAct]).unwrap();

    let mut frame = Vec::new();
    frame.extend_from_slice(&12u16.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.push(4);
    put_utf16(&mut frame, "");
    frame.extend_from_slice(&7u16.to_be_bytes()); // NotImplemented
    frame.push(0);
    let body_len = (frame.len() - 4) as u16;
    frame[2..4].copy_from_slice(&body_len.to_be_bytes());

    message.decode_response(&frame).unwrap();
    assert_eq!(
        message.status().unwrap_err(),
        C3Error::Code(C3ErrorCode::NotImplemented)
    );
}
