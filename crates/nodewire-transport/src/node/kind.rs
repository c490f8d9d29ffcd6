//! The closed set of node kinds and their wire encoding.

use std::fmt;

use crate::error::NodeError;

/// What a node is used for. Sent on the wire as a 4-byte signed integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// First node of a physical connection; owns the others.
    Primary,
    /// Reserved heartbeat channel.
    Liveness,
    /// On-demand feature channel.
    Auxiliary,
}

impl NodeKind {
    pub const fn to_wire(self) -> i32 {
        match self {
            Self::Primary => 0,
            Self::Liveness => 1,
            Self::Auxiliary => 2,
        }
    }
}

impl TryFrom<i32> for NodeKind {
    type Error = NodeError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Primary),
            1 => Ok(Self::Liveness),
            2 => Ok(Self::Auxiliary),
            other => Err(NodeError::InvalidKind(other)),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::Liveness => "liveness",
            Self::Auxiliary => "auxiliary",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_roundtrip() {
        for kind in [NodeKind::Primary, NodeKind::Liveness, NodeKind::Auxiliary] {
            assert_eq!(NodeKind::try_from(kind.to_wire()).unwrap(), kind);
        }
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        for raw in [-1, 3, 5, i32::MAX] {
            assert!(matches!(
                NodeKind::try_from(raw),
                Err(NodeError::InvalidKind(v)) if v == raw
            ));
        }
    }
}
