use std::fmt;

use serde::{Deserialize, Serialize};

use crate::expr::mask;

/// Port direction as seen from the component that declares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn flipped(self) -> Self {
        match self {
            Direction::In => Direction::Out,
            Direction::Out => Direction::In,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => write!(f, "in"),
            Direction::Out => write!(f, "out"),
        }
    }
}

/// A single multi-bit signal. Every store is truncated to the declared width,
/// so the carried value is always in `[0, 2^width)`.
#[derive(Debug, Clone)]
pub struct Wire {
    width: usize,
    value: u64,
}

impl Wire {
    /// Widths outside `1..=64` are clamped into range; the type system cannot
    /// express the bound and the callers validate widths before construction.
    pub fn new(width: usize) -> Self {
        let width = width.clamp(1, 64);
        Self { width, value: 0 }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn get(&self) -> u64 {
        self.value
    }

    pub fn set(&mut self, value: u64) {
        self.value = value & mask(self.width);
    }
}

impl PartialEq for Wire {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width && self.value == other.value
    }
}

impl Eq for Wire {}

/// A named, directioned endpoint of a component. The port owns its wire;
/// disconnected inputs read their default value.
#[derive(Debug, Clone)]
pub struct Port {
    pub name: String,
    pub direction: Direction,
    pub default: Option<u64>,
    wire: Wire,
    connected: bool,
}

impl Port {
    pub fn new(name: impl Into<String>, direction: Direction, width: usize) -> Self {
        Self {
            name: name.into(),
            direction,
            default: None,
            wire: Wire::new(width),
            connected: false,
        }
    }

    pub fn with_default(mut self, default: u64) -> Self {
        self.default = Some(default & mask(self.wire.width()));
        if self.direction == Direction::In && !self.connected {
            self.wire.set(default);
        }
        self
    }

    pub fn width(&self) -> usize {
        self.wire.width()
    }

    pub fn read(&self) -> u64 {
        if self.direction == Direction::In && !self.connected {
            return self.default.unwrap_or(0);
        }
        self.wire.get()
    }

    pub fn write(&mut self, value: u64) {
        self.wire.set(value);
    }

    /// Marks the port as driven by a connection. Reads now come from the wire
    /// instead of the default.
    pub fn attach(&mut self) {
        self.connected = true;
    }

    pub fn detach(&mut self) {
        self.connected = false;
        self.wire.set(self.default.unwrap_or(0));
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}
