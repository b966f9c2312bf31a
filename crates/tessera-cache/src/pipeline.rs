//! Multi-key command batches.

use std::time::Duration;

/// One command inside a [`Pipeline`].
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOp {
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Get {
        key: String,
    },
    Delete {
        key: String,
    },
    SAdd {
        key: String,
        members: Vec<String>,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
}

impl PipelineOp {
    /// The single key this command reads or writes.
    pub fn key(&self) -> &str {
        match self {
            PipelineOp::Set { key, .. }
            | PipelineOp::Get { key }
            | PipelineOp::Delete { key }
            | PipelineOp::SAdd { key, .. }
            | PipelineOp::Expire { key, .. } => key,
        }
    }
}

/// Reply for one [`PipelineOp`], in submission order.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineReply {
    /// `Set` acknowledged
    Ok,
    /// `Get` result
    Value(Option<String>),
    /// `Delete`/`SAdd` count
    Count(u64),
    /// `Expire` result (false when the key does not exist)
    Bool(bool),
}

/// Ordered batch of commands sent in a single round trip.
///
/// When `atomic` is set the store applies every command or none
/// (MULTI/EXEC on Redis).
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    pub(crate) ops: Vec<PipelineOp>,
    pub(crate) atomic: bool,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap the batch in a transaction.
    pub fn atomic(mut self) -> Self {
        self.atomic = true;
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>, ttl: Option<Duration>) -> Self {
        self.ops.push(PipelineOp::Set {
            key: key.into(),
            value: value.into(),
            ttl,
        });
        self
    }

    pub fn get(mut self, key: impl Into<String>) -> Self {
        self.ops.push(PipelineOp::Get { key: key.into() });
        self
    }

    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.ops.push(PipelineOp::Delete { key: key.into() });
        self
    }

    /// Add members to a set; an empty member list is skipped.
    pub fn sadd(mut self, key: impl Into<String>, members: Vec<String>) -> Self {
        if !members.is_empty() {
            self.ops.push(PipelineOp::SAdd {
                key: key.into(),
                members,
            });
        }
        self
    }

    /// Replace a set with `members` and give it a TTL. An empty member list
    /// only deletes the key, since Redis rejects `SADD` without members.
    pub fn replace_set(self, key: impl Into<String>, members: Vec<String>, ttl: Duration) -> Self {
        let key = key.into();
        let pipeline = self.delete(key.clone());
        if members.is_empty() {
            return pipeline;
        }
        pipeline.sadd(key.clone(), members).expire(key, ttl)
    }

    pub fn expire(mut self, key: impl Into<String>, ttl: Duration) -> Self {
        self.ops.push(PipelineOp::Expire {
            key: key.into(),
            ttl,
        });
        self
    }

    pub fn ops(&self) -> &[PipelineOp] {
        &self.ops
    }

    pub fn is_atomic(&self) -> bool {
        self.atomic
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_skips_empty_sadd() {
        let pipe = Pipeline::new()
            .atomic()
            .delete("k")
            .sadd("k", vec![])
            .expire("k", Duration::from_secs(10));

        assert!(pipe.is_atomic());
        assert_eq!(pipe.len(), 2);
        assert!(matches!(pipe.ops()[1], PipelineOp::Expire { .. }));
    }

    #[test]
    fn test_replace_set_with_no_members_only_deletes() {
        let ttl = Duration::from_secs(60);
        let pipe = Pipeline::new()
            .replace_set("empty", vec![], ttl)
            .replace_set("full", vec!["a".to_string()], ttl);

        let ops: Vec<(&str, &str)> = pipe
            .ops()
            .iter()
            .map(|op| {
                let kind = match op {
                    PipelineOp::Delete { .. } => "del",
                    PipelineOp::SAdd { .. } => "sadd",
                    PipelineOp::Expire { .. } => "expire",
                    _ => "other",
                };
                (kind, op.key())
            })
            .collect();
        assert_eq!(
            ops,
            vec![("del", "empty"), ("del", "full"), ("sadd", "full"), ("expire", "full")]
        );
    }
}
