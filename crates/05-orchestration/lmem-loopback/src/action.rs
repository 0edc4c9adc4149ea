//! Immutable action descriptors.

use device_abi::{BufferHandle, StreamDirection};
use smallvec::SmallVec;

/// Buffer bound to a named stream of an action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamBinding {
    pub direction: StreamDirection,
    pub stream: String,
    pub buffer: BufferHandle,
    pub bytes: u64,
}

/// Named operation with its scalar parameters and stream bindings.
///
/// Parameters and bindings are issued in insertion order when the action
/// runs. Built once through [`ActionBuilder`] and consumed by the single
/// execution, so a descriptor cannot be duplicated:
///
/// ```compile_fail
/// fn duplicable<T: Clone>() {}
/// duplicable::<lmem_loopback::Action>();
/// ```
#[derive(Debug, PartialEq, Eq)]
pub struct Action {
    operation: String,
    params: SmallVec<[(String, u64); 4]>,
    streams: SmallVec<[StreamBinding; 2]>,
}

impl Action {
    /// Starts an action for `operation`, e.g. `"writeLMem"`.
    pub fn builder(operation: impl Into<String>) -> ActionBuilder {
        ActionBuilder {
            action: Action {
                operation: operation.into(),
                params: SmallVec::new(),
                streams: SmallVec::new(),
            },
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn params(&self) -> &[(String, u64)] {
        &self.params
    }

    pub fn streams(&self) -> &[StreamBinding] {
        &self.streams
    }
}

/// Builder for [`Action`].
#[derive(Debug)]
pub struct ActionBuilder {
    action: Action,
}

impl ActionBuilder {
    /// Sets a scalar parameter. Setting the same name again replaces the value
    /// but keeps its original position.
    pub fn param(mut self, name: impl Into<String>, value: u64) -> Self {
        let name = name.into();
        match self.action.params.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.action.params.push((name, value)),
        }
        self
    }

    /// Binds `buffer` as the source of input stream `stream`.
    pub fn input(self, stream: impl Into<String>, buffer: BufferHandle, bytes: u64) -> Self {
        self.bind(StreamDirection::Input, stream.into(), buffer, bytes)
    }

    /// Binds `buffer` as the sink of output stream `stream`.
    pub fn output(self, stream: impl Into<String>, buffer: BufferHandle, bytes: u64) -> Self {
        self.bind(StreamDirection::Output, stream.into(), buffer, bytes)
    }

    fn bind(
        mut self,
        direction: StreamDirection,
        stream: String,
        buffer: BufferHandle,
        bytes: u64,
    ) -> Self {
        self.action.streams.push(StreamBinding {
            direction,
            stream,
            buffer,
            bytes,
        });
        self
    }

    pub fn build(self) -> Action {
        self.action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn params_keep_insertion_order_and_last_value() {
        let action = Action::builder("writeLMem")
            .param("address", 0)
            .param("nbytes", 1536)
            .param("address", 1536)
            .build();
        assert_eq!(action.operation(), "writeLMem");
        assert_eq!(
            action.params(),
            &[("address".to_string(), 1536), ("nbytes".to_string(), 1536)]
        );
    }

    #[test]
    fn streams_record_direction() {
        let a = BufferHandle::from_raw(1);
        let out = BufferHandle::from_raw(2);
        let action = Action::builder("copy")
            .input("in", a, 16)
            .output("out", out, 16)
            .build();
        let directions: Vec<_> = action.streams().iter().map(|s| s.direction).collect();
        assert_eq!(
            directions,
            vec![StreamDirection::Input, StreamDirection::Output]
        );
        assert_eq!(action.streams()[1].buffer, out);
    }
}
