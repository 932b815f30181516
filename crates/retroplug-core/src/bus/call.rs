//! Call types and node identities
//!
//! A call type is a zero-sized marker binding a request payload to a response
//! payload. Fire-and-forget calls use `()` as their response.

use std::any::TypeId;

/// Thread-affine endpoint identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeType {
    /// The real-time render thread
    Audio,
    /// The cooperative UI/control thread
    Ui,
}

impl NodeType {
    /// Whether the node's thread has a hard per-tick deadline
    ///
    /// Real-time nodes may enqueue but must never wait on another node.
    pub fn is_realtime(self) -> bool {
        matches!(self, NodeType::Audio)
    }

    pub fn name(self) -> &'static str {
        match self {
            NodeType::Audio => "Audio",
            NodeType::Ui => "Ui",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A statically distinct request/response pair
pub trait Call: 'static {
    /// Payload moved into the receiving node
    type Request: Send + 'static;
    /// Payload moved back to a blocking caller
    type Response: Send + 'static;
    /// Name used in logs and errors
    const NAME: &'static str;
}

/// Registration record for a call type
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallInfo {
    pub name: &'static str,
    pub capacity: usize,
}

/// Key used to look up a call's channel
#[inline]
pub(crate) fn call_id<C: Call>() -> TypeId {
    TypeId::of::<C>()
}

/// Declare an uninhabited call marker type
///
/// ```ignore
/// define_call! {
///     /// Replace the instance in a slot
///     pub SwapInstance: InstanceSwap => Option<Instance>;
/// }
/// ```
#[macro_export]
macro_rules! define_call {
    ($($(#[$meta:meta])* $vis:vis $name:ident : $req:ty => $resp:ty;)+) => {
        $(
            $(#[$meta])*
            #[derive(Debug)]
            $vis enum $name {}

            impl $crate::bus::Call for $name {
                type Request = $req;
                type Response = $resp;
                const NAME: &'static str = stringify!($name);
            }
        )+
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::define_call! {
        Ping: u32 => u32;
        Nudge: () => ();
    }

    #[test]
    fn test_call_names() {
        assert_eq!(Ping::NAME, "Ping");
        assert_eq!(Nudge::NAME, "Nudge");
        assert_ne!(call_id::<Ping>(), call_id::<Nudge>());
    }

    #[test]
    fn test_only_audio_is_realtime() {
        assert!(NodeType::Audio.is_realtime());
        assert!(!NodeType::Ui.is_realtime());
        assert_eq!(NodeType::Ui.to_string(), "Ui");
    }
}
