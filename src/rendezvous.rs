//! Key-to-server election for the cluster client.

use murmur3::murmur3_32;

/// A hasher elects one node out of the current candidate set for a key.
pub trait NodeHasher: Send {
    /// Register a candidate. Adding a node twice is a no-op.
    fn add_node(&mut self, node: &str);

    /// Unregister a candidate. Removing an absent node is a no-op.
    fn remove_node(&mut self, node: &str);

    /// Elect the node owning `key`, or `None` when no candidates exist.
    fn get_node(&self, key: &[u8]) -> Option<&str>;
}

/// Highest Random Weight (rendezvous) hashing.
///
/// Every node is scored against the key and the highest score wins, so
/// membership changes only remap the keys the affected node owned. Ties
/// break towards the lexicographically greater node key.
pub struct RendezvousHash {
    nodes: Vec<String>,
    seed: u32,
    hash_function: fn(&[u8], u32) -> u32,
}

impl RendezvousHash {
    /// An empty candidate set scored with seeded murmur3. Distinct seeds
    /// give independent hashers, e.g. for layered caches.
    pub fn new(seed: u32) -> Self {
        RendezvousHash {
            nodes: Vec::new(),
            seed,
            hash_function: murmur3_score,
        }
    }

    /// Swap in a different scoring function.
    pub fn with_hash_function(seed: u32, hash_function: fn(&[u8], u32) -> u32) -> Self {
        RendezvousHash {
            nodes: Vec::new(),
            seed,
            hash_function,
        }
    }

    /// The current candidate set, in insertion order.
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    fn score(&self, node: &str, key: &[u8]) -> u32 {
        let mut buf = Vec::with_capacity(node.len() + 1 + key.len());
        buf.extend_from_slice(node.as_bytes());
        buf.push(b'-');
        buf.extend_from_slice(key);
        (self.hash_function)(&buf, self.seed)
    }
}

impl Default for RendezvousHash {
    fn default() -> Self {
        RendezvousHash::new(0)
    }
}

fn murmur3_score(data: &[u8], seed: u32) -> u32 {
    // reading from a slice cannot fail
    murmur3_32(&mut &data[..], seed).unwrap_or(0)
}

impl NodeHasher for RendezvousHash {
    fn add_node(&mut self, node: &str) {
        if !self.nodes.iter().any(|n| n == node) {
            self.nodes.push(node.to_string());
        }
    }

    fn remove_node(&mut self, node: &str) {
        self.nodes.retain(|n| n != node);
    }

    fn get_node(&self, key: &[u8]) -> Option<&str> {
        let mut winner: Option<(&String, u32)> = None;
        for node in &self.nodes {
            let score = self.score(node, key);
            winner = match winner {
                None => Some((node, score)),
                Some((_, high)) if score > high => Some((node, score)),
                Some((best, high)) if score == high && node.as_str() > best.as_str() => {
                    Some((node, score))
                }
                keep => keep,
            };
        }
        winner.map(|(node, _)| node.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::{NodeHasher, RendezvousHash};

    fn hasher_with(nodes: &[&str]) -> RendezvousHash {
        let mut hasher = RendezvousHash::default();
        for node in nodes {
            hasher.add_node(node);
        }
        hasher
    }

    #[test]
    fn test_empty_set_elects_nobody() {
        let hasher = RendezvousHash::default();
        assert_eq!(None, hasher.get_node(b"key"));
    }

    #[test]
    fn test_election_is_deterministic() {
        let hasher = hasher_with(&["10.0.0.1:11211", "10.0.0.2:11211", "10.0.0.3:11211"]);
        let winner = hasher.get_node(b"key").map(str::to_string);
        assert!(winner.is_some());
        for _ in 0..10 {
            assert_eq!(winner.as_deref(), hasher.get_node(b"key"));
        }
    }

    #[test]
    fn test_add_node_is_idempotent() {
        let mut hasher = hasher_with(&["a:1", "b:1"]);
        hasher.add_node("a:1");
        assert_eq!(2, hasher.nodes().len());
    }

    #[test]
    fn test_remove_absent_node_is_noop() {
        let mut hasher = hasher_with(&["a:1"]);
        hasher.remove_node("b:1");
        assert_eq!(1, hasher.nodes().len());
    }

    #[test]
    fn test_removing_a_loser_does_not_remap() {
        // HRW stability: dropping a node only remaps the keys it owned
        let mut hasher = hasher_with(&["10.0.0.1:11211", "10.0.0.2:11211", "10.0.0.3:11211"]);
        let keys: Vec<Vec<u8>> = (0..50).map(|i| format!("key{}", i).into_bytes()).collect();

        let before: Vec<String> = keys
            .iter()
            .map(|k| hasher.get_node(k).unwrap().to_string())
            .collect();

        let victim = "10.0.0.2:11211";
        hasher.remove_node(victim);
        for (key, owner) in keys.iter().zip(&before) {
            if owner != victim {
                assert_eq!(Some(owner.as_str()), hasher.get_node(key));
            } else {
                assert_ne!(Some(victim), hasher.get_node(key));
            }
        }
    }

    #[test]
    fn test_readding_restores_the_original_owner() {
        let mut hasher = hasher_with(&["a:11211", "b:11211", "c:11211"]);
        let owner = hasher.get_node(b"stable-key").unwrap().to_string();
        hasher.remove_node(&owner);
        hasher.add_node(&owner);
        assert_eq!(Some(owner.as_str()), hasher.get_node(b"stable-key"));
    }

    #[test]
    fn test_tie_breaks_to_the_greater_node_key() {
        // a constant score forces every comparison down the tie-break path
        let mut hasher = RendezvousHash::with_hash_function(0, |_, _| 7);
        hasher.add_node("b:11211");
        hasher.add_node("c:11211");
        hasher.add_node("a:11211");
        assert_eq!(Some("c:11211"), hasher.get_node(b"any"));
    }

    #[test]
    fn test_seed_changes_the_scores() {
        let keys: Vec<Vec<u8>> = (0..200).map(|i| format!("key{}", i).into_bytes()).collect();
        let a = hasher_with(&["n1:1", "n2:1", "n3:1"]);
        let mut b = RendezvousHash::new(0xdead_beef);
        for node in ["n1:1", "n2:1", "n3:1"].iter() {
            b.add_node(node);
        }
        let differs = keys
            .iter()
            .any(|k| a.get_node(k) != b.get_node(k));
        assert!(differs);
    }

    #[test]
    fn test_distribution_uses_every_node() {
        let hasher = hasher_with(&["n1:1", "n2:1", "n3:1"]);
        let mut seen = std::collections::HashSet::new();
        for i in 0..200 {
            let key = format!("key{}", i).into_bytes();
            seen.insert(hasher.get_node(&key).unwrap().to_string());
        }
        assert_eq!(3, seen.len());
    }
}
