//! Deinterlace filter settings, defaults and property sheet.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

/// Settings key selecting the deinterlacing technique.
pub const KEY_DEINTERLACER: &str = "deinterlacer";
/// Settings key for the field order flag (true = top field first).
pub const KEY_FIELD_ORDER: &str = "field_order";

/// Deinterlacing techniques exposed by the bundled effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Technique {
    /// Average each line with its neighbour from the other field.
    Blend,
    /// Keep one field and line-double it.
    Discard,
    /// Keep one field and interpolate the missing lines.
    Linear,
    /// Motion adaptive, with spatial interlacing check.
    #[default]
    YadifMode0,
    /// Motion adaptive, without spatial interlacing check.
    YadifMode2,
    /// Edge directed interpolation of the kept field only.
    YadifDiscard,
}

impl Technique {
    pub const ALL: [Technique; 6] = [
        Technique::Blend,
        Technique::Discard,
        Technique::Linear,
        Technique::YadifMode0,
        Technique::YadifMode2,
        Technique::YadifDiscard,
    ];

    /// Name of the technique entry point inside the effect.
    pub fn name(&self) -> &'static str {
        match self {
            Technique::Blend => "DrawBlend",
            Technique::Discard => "DrawDiscard",
            Technique::Linear => "DrawLinear",
            Technique::YadifMode0 => "DrawYadifMode0",
            Technique::YadifMode2 => "DrawYadifMode2",
            Technique::YadifDiscard => "DrawYadifDiscard",
        }
    }

    /// Human readable label used in the property sheet.
    pub fn label(&self) -> &'static str {
        match self {
            Technique::Blend => "Blend",
            Technique::Discard => "Discard",
            Technique::Linear => "Linear",
            Technique::YadifMode0 => "Yadif",
            Technique::YadifMode2 => "Yadif (no spatial check)",
            Technique::YadifDiscard => "Yadif Discard",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

/// Typed view of the filter's settings mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeinterlaceSettings {
    /// Technique entry point name. Stored as given, even if unknown.
    #[serde(default = "default_deinterlacer")]
    pub deinterlacer: String,
    /// True when the top field comes first.
    #[serde(default)]
    pub field_order: bool,
}

fn default_deinterlacer() -> String {
    Technique::default().name().to_string()
}

impl Default for DeinterlaceSettings {
    fn default() -> Self {
        Self {
            deinterlacer: default_deinterlacer(),
            field_order: false,
        }
    }
}

impl DeinterlaceSettings {
    /// Read settings from a host settings value. Missing keys take their defaults.
    pub fn from_value(value: &Value) -> Result<Self, serde_yaml::Error> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_yaml::from_value(value.clone())
    }

    pub fn to_value(&self) -> Value {
        let mut map = Mapping::new();
        map.insert(KEY_DEINTERLACER.into(), self.deinterlacer.clone().into());
        map.insert(KEY_FIELD_ORDER.into(), self.field_order.into());
        Value::Mapping(map)
    }
}

/// Default settings mapping for a freshly attached filter.
pub fn defaults() -> Value {
    DeinterlaceSettings::default().to_value()
}

/// A single editable property shown by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    /// Pick one string value from a fixed list of `(label, value)` pairs.
    List {
        key: &'static str,
        label: &'static str,
        items: Vec<(&'static str, &'static str)>,
    },
    Bool {
        key: &'static str,
        label: &'static str,
    },
}

impl Property {
    pub fn key(&self) -> &'static str {
        match self {
            Property::List { key, .. } | Property::Bool { key, .. } => key,
        }
    }
}

/// Property sheet for the deinterlace filter.
pub fn properties() -> Vec<Property> {
    vec![
        Property::List {
            key: KEY_DEINTERLACER,
            label: "Deinterlace method",
            items: Technique::ALL.iter().map(|t| (t.label(), t.name())).collect(),
        },
        Property::Bool {
            key: KEY_FIELD_ORDER,
            label: "Top field first",
        },
    ]
}
