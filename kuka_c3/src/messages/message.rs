use crate::errors::{C3Error, C3ErrorCode};
use crate::messages::wire::{put_utf16, FrameReader};
use crate::messages::C3VariableName;

/// Wire message types used by the gateway. The C3 protocol defines many
/// more (file transfer, cross commands, ...) that this client never issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum C3MessageType {
    ReadVariable = 4,
    WriteVariable = 5,
    ReadMultiple = 6,
    WriteMultiple = 7,
}

impl C3MessageType {
    fn from_wire(raw: u8) -> Result<Self, C3Error> {
        match raw {
            4 => Ok(C3MessageType::ReadVariable),
            5 => Ok(C3MessageType::WriteVariable),
            6 => Ok(C3MessageType::ReadMultiple),
            7 => Ok(C3MessageType::WriteMultiple),
            other => Err(C3Error::Decode(format!("unknown message type {other}"))),
        }
    }
}

/// One variable slot of a request/response: the value is absent on read
/// requests and filled in by the response; the error code starts at
/// `NotReady` and is set per variable when a multiple response decodes.
#[derive(Debug, Clone, PartialEq)]
pub struct C3Variable {
    pub name: C3VariableName,
    pub value: Option<String>,
    pub error_code: C3ErrorCode,
}

/// A request/response pair of the C3 variable-access protocol, correlated
/// over the wire by its 16-bit tag.
///
/// Construction picks the wire type from the variable list: one variable
/// maps to the single-variable commands, several to the multiple commands;
/// a list mixing present and absent values is rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct C3Message {
    tag_id: u16,
    message_type: C3MessageType,
    variables: Vec<C3Variable>,
    error_code: C3ErrorCode,
    success: bool,
}

impl C3Message {
    pub fn new(
        tag_id: u16,
        variables: Vec<(C3VariableName, Option<String>)>,
    ) -> Result<Self, C3Error> {
        if variables.is_empty() {
            return Err(C3Error::EmptyVariableList);
        }

        let is_read = variables[0].1.is_none();
        if variables.iter().any(|(_, value)| value.is_none() != is_read) {
            return Err(C3Error::MixedReadWrite);
        }

        let message_type = match (is_read, variables.len()) {
            (true, 1) => C3MessageType::ReadVariable,
            (true, _) => C3MessageType::ReadMultiple,
            (false, 1) => C3MessageType::WriteVariable,
            (false, _) => C3MessageType::WriteMultiple,
        };

        Ok(Self {
            tag_id,
            message_type,
            variables: variables
                .into_iter()
                .map(|(name, value)| C3Variable {
                    name,
                    value,
                    error_code: C3ErrorCode::NotReady,
                })
                .collect(),
            error_code: C3ErrorCode::NotReady,
            success: false,
        })
    }

    /// All-read request for the given variable names.
    pub fn read(tag_id: u16, names: &[C3VariableName]) -> Result<Self, C3Error> {
        Self::new(tag_id, names.iter().map(|&name| (name, None)).collect())
    }

    /// All-write request for the given name/value pairs.
    pub fn write(tag_id: u16, writes: Vec<(C3VariableName, String)>) -> Result<Self, C3Error> {
        Self::new(
            tag_id,
            writes
                .into_iter()
                .map(|(name, value)| (name, Some(value)))
                .collect(),
        )
    }

    pub fn tag_id(&self) -> u16 {
        self.tag_id
    }

    pub fn message_type(&self) -> C3MessageType {
        self.message_type
    }

    pub fn variables(&self) -> &[C3Variable] {
        &self.variables
    }

    /// Outcome of a decoded response: `Ok` only when the robot flagged
    /// success with a `Success` global code.
    pub fn status(&self) -> Result<(), C3Error> {
        if self.success && self.error_code == C3ErrorCode::Success {
            Ok(())
        } else {
            Err(C3Error::Code(self.error_code))
        }
    }

    /// Serializes the request frame.
    pub fn encode(&self) -> Result<Vec<u8>, C3Error> {
        let mut frame = Vec::with_capacity(64);
        frame.extend_from_slice(&self.tag_id.to_be_bytes());
        frame.extend_from_slice(&0u16.to_be_bytes()); // body length, patched below
        frame.push(self.message_type as u8);

        match self.message_type {
            C3MessageType::ReadVariable => {
                put_utf16(&mut frame, self.variables[0].name.as_str());
            }
            C3MessageType::WriteVariable => {
                let variable = &self.variables[0];
                put_utf16(&mut frame, variable.name.as_str());
                put_utf16(&mut frame, self.write_value(variable)?);
            }
            C3MessageType::ReadMultiple => {
                frame.push(self.variable_count()?);
                for variable in &self.variables {
                    put_utf16(&mut frame, variable.name.as_str());
                }
            }
            C3MessageType::WriteMultiple => {
                frame.push(self.variable_count()?);
                for variable in &self.variables {
                    put_utf16(&mut frame, variable.name.as_str());
                    put_utf16(&mut frame, self.write_value(variable)?);
                }
            }
        }

        let body_len = frame.len() - 4;
        if body_len > u16::MAX as usize {
            return Err(C3Error::Encode(format!("body length {body_len} overflows")));
        }
        frame[2..4].copy_from_slice(&(body_len as u16).to_be_bytes());
        Ok(frame)
    }

    fn write_value<'a>(&self, variable: &'a C3Variable) -> Result<&'a str, C3Error> {
        variable
            .value
            .as_deref()
            .ok_or_else(|| C3Error::Encode(format!("write of {} has no value", variable.name)))
    }

    fn variable_count(&self) -> Result<u8, C3Error> {
        u8::try_from(self.variables.len())
            .map_err(|_| C3Error::Encode(format!("{} variables overflow u8", self.variables.len())))
    }

    /// Decodes a response frame into this message, filling values and error
    /// codes. The frame must carry this message's tag and type.
    pub fn decode_response(&mut self, frame: &[u8]) -> Result<(), C3Error> {
        let mut reader = FrameReader::new(frame);

        let tag_id = reader.read_u16("TagID")?;
        if tag_id != self.tag_id {
            return Err(C3Error::TagMismatch {
                expected: self.tag_id,
                received: tag_id,
            });
        }

        let _body_len = reader.read_u16("MessageLength")?;
        let raw_type = reader.read_u8("MessageType")?;
        let message_type = C3MessageType::from_wire(raw_type)?;
        if message_type != self.message_type {
            return Err(C3Error::TypeMismatch {
                expected: self.message_type as u8,
                received: raw_type,
            });
        }

        match message_type {
            C3MessageType::ReadVariable | C3MessageType::WriteVariable => {
                let value = reader.read_utf16_string("VariableValue")?;
                self.variables[0].value = Some(value);
                self.variables[0].error_code = C3ErrorCode::Success;
            }
            C3MessageType::ReadMultiple | C3MessageType::WriteMultiple => {
                let count = reader.read_u8("VariableCount")? as usize;
                if count != self.variables.len() {
                    return Err(C3Error::Decode(format!(
                        "response carries {count} variables, request had {}",
                        self.variables.len()
                    )));
                }
                for variable in &mut self.variables {
                    let code = reader.read_u8("VariableErrorCode")?;
                    variable.error_code = C3ErrorCode::from_wire(code as u16);
                    variable.value = Some(reader.read_utf16_string("VariableValue")?);
                }
            }
        }

        self.error_code = C3ErrorCode::from_wire(reader.read_u16("ErrorCode")?);
        self.success = reader.read_u8("SuccessFlag")? != 0;
        Ok(())
    }
}
