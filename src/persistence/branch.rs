//! Branch tokens
//!
//! A branch token addresses one root-to-leaf path of a history tree. Callers
//! treat it as an opaque byte string; internally it is a versioned envelope:
//!
//! ```text
//! [version u8][tree_id 16B][branch_id 16B][ancestor_count u32][ancestor...]
//! ancestor = [branch_id 16B][end_node_id i64]
//! ```
//!
//! Integers are big-endian. The version byte gates future wire changes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::persistence::error::HistoryError;

const BRANCH_TOKEN_VERSION: u8 = 1;

/// One cut point in a branch's parent chain.
///
/// The ancestor branch physically owns nodes in [its own begin, end_node_id).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchAncestor {
    pub branch_id: Uuid,
    pub end_node_id: i64,
}

/// Decoded form of a branch token
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryBranch {
    pub tree_id: Uuid,
    pub branch_id: Uuid,
    pub ancestors: Vec<BranchAncestor>,
}

impl HistoryBranch {
    /// A root branch: no ancestors, nodes begin at 1
    pub fn new_root(tree_id: Uuid, branch_id: Uuid) -> Self {
        Self {
            tree_id,
            branch_id,
            ancestors: Vec::new(),
        }
    }

    /// First node id physically owned by this branch
    pub fn begin_node_id(&self) -> i64 {
        match self.ancestors.last() {
            Some(ancestor) => ancestor.end_node_id,
            None => 1,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + 16 + 16 + 4 + self.ancestors.len() * 24);
        buf.put_u8(BRANCH_TOKEN_VERSION);
        buf.put_slice(self.tree_id.as_bytes());
        buf.put_slice(self.branch_id.as_bytes());
        buf.put_u32(self.ancestors.len() as u32);
        for ancestor in &self.ancestors {
            buf.put_slice(ancestor.branch_id.as_bytes());
            buf.put_i64(ancestor.end_node_id);
        }
        buf.freeze()
    }

    pub fn decode(token: &[u8]) -> Result<Self, HistoryError> {
        let mut buf = token;
        if buf.remaining() < 1 + 16 + 16 + 4 {
            return Err(HistoryError::InvalidRequest(
                "branch token too short".to_string(),
            ));
        }
        let version = buf.get_u8();
        if version != BRANCH_TOKEN_VERSION {
            return Err(HistoryError::InvalidRequest(format!(
                "unknown branch token version {}",
                version
            )));
        }
        let tree_id = read_uuid(&mut buf);
        let branch_id = read_uuid(&mut buf);
        let count = buf.get_u32() as usize;
        if buf.remaining() != count * 24 {
            return Err(HistoryError::InvalidRequest(
                "branch token ancestor section truncated".to_string(),
            ));
        }
        let mut ancestors = Vec::with_capacity(count);
        for _ in 0..count {
            let branch_id = read_uuid(&mut buf);
            let end_node_id = buf.get_i64();
            ancestors.push(BranchAncestor {
                branch_id,
                end_node_id,
            });
        }
        Ok(Self {
            tree_id,
            branch_id,
            ancestors,
        })
    }
}

fn read_uuid(buf: &mut &[u8]) -> Uuid {
    let mut raw = [0u8; 16];
    buf.copy_to_slice(&mut raw);
    Uuid::from_bytes(raw)
}

/// Rebuild a token for `branch_id`, keeping the tree id and ancestor chain
/// of `existing`. Used when only (tree, branch) addressing matters, e.g.
/// force-completing an abandoned fork found during deletion.
pub fn new_history_branch_token_from_another(
    branch_id: Uuid,
    existing: &[u8],
) -> Result<Bytes, HistoryError> {
    let mut branch = HistoryBranch::decode(existing)?;
    branch.branch_id = branch_id;
    Ok(branch.encode())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_token_round_trip() {
        let branch = HistoryBranch::new_root(Uuid::new_v4(), Uuid::new_v4());
        let decoded = HistoryBranch::decode(&branch.encode()).unwrap();
        assert_eq!(decoded, branch);
        assert_eq!(decoded.begin_node_id(), 1);
    }

    #[test]
    fn test_token_with_ancestors_round_trip() {
        let branch = HistoryBranch {
            tree_id: Uuid::new_v4(),
            branch_id: Uuid::new_v4(),
            ancestors: vec![
                BranchAncestor {
                    branch_id: Uuid::new_v4(),
                    end_node_id: 7,
                },
                BranchAncestor {
                    branch_id: Uuid::new_v4(),
                    end_node_id: 19,
                },
            ],
        };
        let decoded = HistoryBranch::decode(&branch.encode()).unwrap();
        assert_eq!(decoded, branch);
        assert_eq!(decoded.begin_node_id(), 19);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(HistoryBranch::decode(b"").is_err());
        assert!(HistoryBranch::decode(b"\x01short").is_err());

        let mut token = HistoryBranch::new_root(Uuid::new_v4(), Uuid::new_v4())
            .encode()
            .to_vec();
        token[0] = 99;
        assert!(HistoryBranch::decode(&token).is_err());
    }

    #[test]
    fn test_rebuild_substitutes_leaf_only() {
        let original = HistoryBranch {
            tree_id: Uuid::new_v4(),
            branch_id: Uuid::new_v4(),
            ancestors: vec![BranchAncestor {
                branch_id: Uuid::new_v4(),
                end_node_id: 5,
            }],
        };
        let other_leaf = Uuid::new_v4();
        let rebuilt = new_history_branch_token_from_another(other_leaf, &original.encode()).unwrap();
        let decoded = HistoryBranch::decode(&rebuilt).unwrap();
        assert_eq!(decoded.tree_id, original.tree_id);
        assert_eq!(decoded.branch_id, other_leaf);
        assert_eq!(decoded.ancestors, original.ancestors);
    }
}
