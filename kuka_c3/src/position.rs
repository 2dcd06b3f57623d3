use std::fmt;

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::C3Error;

/// Which of the two robot pose spaces a [`Position`] lives in.
///
/// The numeric values match the configuration-file encoding, where a
/// position serializes as `[kind, v0, .., v13]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PositionKind {
    /// Joint space: slots 0-5 are A1..A6 in degrees, 8-13 are E1..E6.
    E6Axis = 1,
    /// Cartesian space: slots 0-5 are X,Y,Z (mm) and A,B,C (deg),
    /// slot 6 is S (status), slot 7 is T (turn), 8-13 are E1..E6.
    E6Pos = 2,
}

impl PositionKind {
    fn from_code(code: u8) -> Result<Self, C3Error> {
        match code {
            1 => Ok(PositionKind::E6Axis),
            2 => Ok(PositionKind::E6Pos),
            other => Err(C3Error::PositionFormat(format!(
                "unknown position kind code {other}"
            ))),
        }
    }
}

const SLOT_COUNT: usize = 14;

const AXIS_LABELS: [&str; SLOT_COUNT] = [
    "A1", "A2", "A3", "A4", "A5", "A6", "", "", "E1", "E2", "E3", "E4", "E5", "E6",
];
const POS_LABELS: [&str; SLOT_COUNT] = [
    "X", "Y", "Z", "A", "B", "C", "S", "T", "E1", "E2", "E3", "E4", "E5", "E6",
];

/// A robot pose in the vendor's fixed 14-slot layout.
///
/// The kind is set at construction (or by [`Position::parse`]) and never
/// changes afterwards; operations that mix positions expect matching kinds.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    kind: PositionKind,
    values: [f32; SLOT_COUNT],
}

impl Position {
    pub fn new(kind: PositionKind) -> Self {
        Self {
            kind,
            values: [0.0; SLOT_COUNT],
        }
    }

    /// The reference joint pose the robot must hold at gateway startup and
    /// after internal routines.
    pub fn home() -> Self {
        let mut home = Self::new(PositionKind::E6Axis);
        home.values[1] = -90.0;
        home.values[2] = 90.0;
        home
    }

    pub fn kind(&self) -> PositionKind {
        self.kind
    }

    pub fn get(&self, slot: usize) -> f32 {
        if slot < SLOT_COUNT {
            self.values[slot]
        } else {
            0.0
        }
    }

    pub fn set(&mut self, slot: usize, value: f32) -> Result<(), C3Error> {
        if slot >= SLOT_COUNT {
            return Err(C3Error::PositionFormat(format!(
                "position slot index {slot} out of range"
            )));
        }
        self.values[slot] = value;
        Ok(())
    }

    fn labels(&self) -> &'static [&'static str; SLOT_COUNT] {
        match self.kind {
            PositionKind::E6Axis => &AXIS_LABELS,
            PositionKind::E6Pos => &POS_LABELS,
        }
    }

    fn header(&self) -> &'static str {
        match self.kind {
            PositionKind::E6Axis => "E6AXIS",
            PositionKind::E6Pos => "E6POS",
        }
    }

    /// Vendor textual form covering the leading six slots, e.g.
    /// `{E6POS: X 1.00000, Y 2.00000, ...}`.
    pub fn render(&self) -> String {
        let labels = self.labels();
        let fields: Vec<String> = (0..6)
            .map(|i| format!("{} {:.5}", labels[i], self.values[i]))
            .collect();
        format!("{{{}: {}}}", self.header(), fields.join(", "))
    }

    /// Full textual form covering every populated slot (the form the robot
    /// reports `$AXIS_ACT` / `$POS_ACT` in).
    pub fn render_full(&self) -> String {
        let labels = self.labels();
        let fields: Vec<String> = (0..SLOT_COUNT)
            .filter(|&i| !labels[i].is_empty())
            .map(|i| format!("{} {:.5}", labels[i], self.values[i]))
            .collect();
        format!("{{{}: {}}}", self.header(), fields.join(", "))
    }

    /// Parses the vendor textual form, accepting both the short and the full
    /// field list. Unknown labels and malformed numbers are rejected.
    pub fn parse(text: &str) -> Result<Self, C3Error> {
        let bad = |detail: &str| C3Error::PositionFormat(format!("{detail} in {text:?}"));

        let inner = text
            .trim()
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .ok_or_else(|| bad("missing braces"))?;
        let (header, fields) = inner.split_once(':').ok_or_else(|| bad("missing header"))?;

        let kind = match header.trim() {
            "E6AXIS" => PositionKind::E6Axis,
            "E6POS" => PositionKind::E6Pos,
            other => return Err(bad(&format!("unknown header {other:?}"))),
        };

        let mut position = Position::new(kind);
        let labels = position.labels();
        for field in fields.split(',') {
            let mut parts = field.split_whitespace();
            let label = parts.next().ok_or_else(|| bad("empty field"))?;
            let raw = parts
                .next()
                .ok_or_else(|| bad(&format!("field {label} has no value")))?;
            if parts.next().is_some() {
                return Err(bad(&format!("field {label} has trailing tokens")));
            }
            let slot = labels
                .iter()
                .position(|&candidate| candidate == label)
                .ok_or_else(|| bad(&format!("unknown field {label:?}")))?;
            position.values[slot] = raw
                .parse::<f32>()
                .map_err(|err| bad(&format!("field {label} value {raw:?}: {err}")))?;
        }

        Ok(position)
    }

    /// Absolute-tolerance comparison over the six primary slots.
    pub fn approx_eq(&self, other: &Position, tolerance: f32) -> bool {
        self.values
            .iter()
            .zip(other.values.iter())
            .take(6)
            .all(|(a, b)| (a - b).abs() <= tolerance)
    }

    /// Absolute-tolerance comparison over all fourteen slots.
    pub fn approx_eq_full(&self, other: &Position, tolerance: f32) -> bool {
        self.values
            .iter()
            .zip(other.values.iter())
            .all(|(a, b)| (a - b).abs() <= tolerance)
    }

    /// Slot-wise subtraction, keeping this position's kind.
    pub fn with_offset(&self, offset: &Position) -> Position {
        let mut shifted = Position::new(self.kind);
        for i in 0..SLOT_COUNT {
            shifted.values[i] = self.values[i] - offset.values[i];
        }
        shifted
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

// The configuration file stores a position as a 15-element array:
// [kind, v0, .., v13].
impl Serialize for Position {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(1 + SLOT_COUNT)?;
        tuple.serialize_element(&(self.kind as u8))?;
        for value in &self.values {
            tuple.serialize_element(value)?;
        }
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for Position {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PositionVisitor;

        impl<'de> Visitor<'de> for PositionVisitor {
            type Value = Position;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an array of 15 numbers: [kind, v0, .., v13]")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Position, A::Error> {
                let code: u8 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let kind = PositionKind::from_code(code).map_err(de::Error::custom)?;
                let mut position = Position::new(kind);
                for i in 0..SLOT_COUNT {
                    position.values[i] = seq
                        .next_element()?
                        .ok_or_else(|| de::Error::invalid_length(1 + i, &self))?;
                }
                Ok(position)
            }
        }

        deserializer.deserialize_tuple(1 + SLOT_COUNT, PositionVisitor)
    }
}
