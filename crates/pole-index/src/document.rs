use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use pole_types::{FieldOption, FieldType, Mapping, Value};

/// Engine field switches, mapped from [`FieldOption`] booleans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFlags(u8);

impl FieldFlags {
    pub const INDEX: FieldFlags = FieldFlags(1 << 0);
    pub const STORE: FieldFlags = FieldFlags(1 << 1);
    pub const TERM_POSITIONS: FieldFlags = FieldFlags(1 << 2);
    pub const HIGHLIGHT: FieldFlags = FieldFlags(1 << 3);
    pub const SORTABLE: FieldFlags = FieldFlags(1 << 4);
    pub const AGGREGATABLE: FieldFlags = FieldFlags(1 << 5);

    pub const fn empty() -> FieldFlags {
        FieldFlags(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: FieldFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for FieldFlags {
    type Output = FieldFlags;

    fn bitor(self, rhs: FieldFlags) -> FieldFlags {
        FieldFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for FieldFlags {
    fn bitor_assign(&mut self, rhs: FieldFlags) {
        self.0 |= rhs.0;
    }
}

/// Defaults substituted when a mapping sets no option at all.
pub const DEFAULT_TEXT_OPTIONS: FieldFlags = FieldFlags(
    FieldFlags::INDEX.0
        | FieldFlags::STORE.0
        | FieldFlags::TERM_POSITIONS.0
        | FieldFlags::HIGHLIGHT.0
        | FieldFlags::SORTABLE.0
        | FieldFlags::AGGREGATABLE.0,
);

pub const DEFAULT_NUMERIC_OPTIONS: FieldFlags = FieldFlags(
    FieldFlags::INDEX.0
        | FieldFlags::STORE.0
        | FieldFlags::SORTABLE.0
        | FieldFlags::AGGREGATABLE.0,
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Text,
    Numeric,
}

/// One field of a document. The value is kept packed the way it is stored:
/// UTF-8 for text, little-endian f64 for numerics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub bytes: Vec<u8>,
    pub flags: FieldFlags,
}

impl Field {
    pub fn text(name: impl Into<String>, value: &str) -> Field {
        Field {
            name: name.into(),
            kind: FieldKind::Text,
            bytes: value.as_bytes().to_vec(),
            flags: DEFAULT_TEXT_OPTIONS,
        }
    }

    pub fn numeric(name: impl Into<String>, value: f64) -> Field {
        Field {
            name: name.into(),
            kind: FieldKind::Numeric,
            bytes: value.to_le_bytes().to_vec(),
            flags: DEFAULT_NUMERIC_OPTIONS,
        }
    }

    pub fn with_flags(mut self, flags: FieldFlags) -> Field {
        self.flags = flags;
        self
    }

    pub fn as_text(&self) -> Option<&str> {
        match self.kind {
            FieldKind::Text => std::str::from_utf8(&self.bytes).ok(),
            FieldKind::Numeric => None,
        }
    }

    pub fn as_numeric(&self) -> Option<f64> {
        match self.kind {
            FieldKind::Numeric => {
                let bytes: [u8; 8] = self.bytes.as_slice().try_into().ok()?;
                Some(f64::from_le_bytes(bytes))
            }
            FieldKind::Text => None,
        }
    }
}

/// A document handed to the engine: an external identifier plus fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Vec<Field>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Document {
        Document { id: id.into(), fields: Vec::new() }
    }

    pub fn add_field(&mut self, field: Field) {
        self.fields.push(field);
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// Build a typed field for a mapped column. Unmapped columns and columns
/// of unknown type yield `None` and are silently dropped by the compiler.
pub fn make_field(mapping: &Mapping, name: &str, value: &Value) -> Option<Field> {
    let entry = mapping.get(name)?;
    let field = match entry.kind {
        FieldType::Numeric => Field::numeric(name, value.as_f64()),
        FieldType::Text => Field::text(name, &value.to_string()),
        FieldType::Unknown => return None,
    };
    let flags = option_flags(&entry.option);
    // all options off: keep the type-specific defaults from the ctor
    if flags.is_empty() {
        Some(field)
    } else {
        Some(field.with_flags(flags))
    }
}

fn option_flags(option: &FieldOption) -> FieldFlags {
    let mut flags = FieldFlags::empty();
    if option.index {
        flags |= FieldFlags::INDEX;
    }
    if option.store {
        flags |= FieldFlags::STORE;
    }
    if option.term_positions {
        flags |= FieldFlags::TERM_POSITIONS;
    }
    if option.highlight {
        flags |= FieldFlags::HIGHLIGHT;
    }
    if option.sortable {
        flags |= FieldFlags::SORTABLE;
    }
    if option.aggregatable {
        flags |= FieldFlags::AGGREGATABLE;
    }
    flags
}
