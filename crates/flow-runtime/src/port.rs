//! Named, typed slots through which values enter and leave nodes.

use flow_core::{IndexableName, SharedValue};

/// A single input or output slot on a node.
///
/// The declared type is the type the port was created with; the actual
/// carried type may differ after assignment and is read from the value.
pub struct Port {
    key: IndexableName,
    caption: String,
    declared_type: String,
    data: Option<SharedValue>,
    required: bool,
    connected: bool,
    index: usize,
}

impl Port {
    pub(crate) fn new(
        key: IndexableName,
        caption: impl Into<String>,
        declared_type: impl Into<String>,
        data: Option<SharedValue>,
        required: bool,
        index: usize,
    ) -> Self {
        Self {
            key,
            caption: caption.into(),
            declared_type: declared_type.into(),
            data,
            required,
            connected: false,
            index,
        }
    }

    /// The hashed key of the port.
    pub fn key(&self) -> &IndexableName {
        &self.key
    }

    /// The variable name of the port (the key's label).
    pub fn var_name(&self) -> &str {
        self.key.name()
    }

    /// The display caption.
    pub fn caption(&self) -> &str {
        &self.caption
    }

    /// Replaces the display caption.
    pub fn set_caption(&mut self, caption: impl Into<String>) {
        self.caption = caption.into();
    }

    /// The current value, if any.
    pub fn data(&self) -> Option<&SharedValue> {
        self.data.as_ref()
    }

    /// The type name currently carried: the held value's tag when data is
    /// present, otherwise the declared type.
    pub fn data_type(&self) -> &str {
        match &self.data {
            Some(data) => data.data_type().name(),
            None => &self.declared_type,
        }
    }

    /// The type the port was declared with.
    pub fn declared_type(&self) -> &str {
        &self.declared_type
    }

    /// Whether the port must always hold a value once initially set.
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Whether an edge is attached to this port.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Insertion position of the port on its node.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Marks the port connected. Returns whether the flag changed.
    pub(crate) fn connect(&mut self) -> bool {
        if self.connected {
            return false;
        }
        self.connected = true;
        true
    }

    /// Marks the port disconnected. Returns whether the flag changed.
    pub(crate) fn disconnect(&mut self) -> bool {
        if !self.connected {
            return false;
        }
        self.connected = false;
        true
    }

    /// Writes the port's value.
    ///
    /// A `None` write to a required port is ignored. When the port is empty,
    /// the write clears, or `output` is set, the held value is replaced
    /// outright. Otherwise the incoming payload is assigned in place, which
    /// preserves bound-storage values; if the in-place assignment reports a
    /// type mismatch the value is replaced instead.
    pub(crate) fn set_data(&mut self, data: Option<SharedValue>, output: bool) {
        if data.is_none() && self.required {
            return;
        }

        let Some(incoming) = data else {
            self.data = None;
            return;
        };

        match &self.data {
            Some(current) if !output => {
                if !current.assign_from(incoming.as_ref()) {
                    self.data = Some(incoming);
                }
            }
            _ => self.data = Some(incoming),
        }
    }
}
