// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The 160-entry finger table and the two-phase ring traversal that rebuilds
//! it after membership changes.

use super::id::Id;

/// A single routing entry: the owner's network identity and its derived id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Finger {
    pub url: String,
    pub id: Id,
}

/// The 160 routing entries a node keeps, one per bit of the identifier
/// space, plus its immediate successor and predecessor.
#[derive(Clone, Debug)]
pub struct FingerTable {
    entries: Vec<Finger>,
    successor: Finger,
    predecessor: Finger,
}

impl FingerTable {
    /// A table for a lone node: every entry, the successor, and the
    /// predecessor all point back at itself.
    pub fn solitary(self_url: String) -> Self {
        let id = Id::of(&self_url);
        let finger = Finger { url: self_url, id };
        Self {
            entries: vec![finger.clone(); 160],
            successor: finger.clone(),
            predecessor: finger,
        }
    }

    /// A table with only the two ring neighbors known (the state
    /// `joinResponse` provides before the first phase 1/2 rebuild runs).
    /// Every numbered entry provisionally points at the successor.
    pub fn with_neighbors(successor: Finger, predecessor: Finger) -> Self {
        Self {
            entries: vec![successor.clone(); 160],
            successor,
            predecessor,
        }
    }

    pub fn successor(&self) -> &Finger {
        &self.successor
    }

    pub fn predecessor(&self) -> &Finger {
        &self.predecessor
    }

    pub fn set_successor(&mut self, f: Finger) {
        self.successor = f;
    }

    pub fn set_predecessor(&mut self, f: Finger) {
        self.predecessor = f;
    }

    pub fn entry(&self, j: usize) -> &Finger {
        &self.entries[j]
    }

    /// `finger_lookup(h)`: the closest preceding (or owning) node for `h`,
    /// as specified in the ring-routing invariant.
    pub fn lookup(&self, self_id: Id, h: Id) -> Finger {
        if Id::in_range(self_id.plus_one(), self.successor.id, h) {
            return self.successor.clone();
        }
        let mut best = self.successor.clone();
        for finger in &self.entries {
            if Id::in_range(self_id.plus_one(), finger.id, h) {
                return best;
            }
            best = finger.clone();
        }
        best
    }

    /// Phase 2 of table construction: given the full ring membership
    /// (sorted by id, successor-first) gathered in phase 1, rebuild all 160
    /// entries, plus successor and predecessor, for a node with the given
    /// identity.
    pub fn rebuild(self_url: &str, ring: &[String]) -> Self {
        let self_id = Id::of(self_url);
        let mut members: Vec<Finger> = ring
            .iter()
            .map(|url| Finger {
                url: url.clone(),
                id: Id::of(url),
            })
            .collect();
        members.sort_by_key(|f| f.id);

        if members.is_empty() || (members.len() == 1 && members[0].id == self_id) {
            return Self::solitary(self_url.to_string());
        }

        let self_pos = members.iter().position(|f| f.id == self_id);
        let rotated: Vec<Finger> = match self_pos {
            Some(pos) => {
                let mut out = Vec::with_capacity(members.len());
                out.extend_from_slice(&members[pos + 1..]);
                out.extend_from_slice(&members[..pos]);
                out
            }
            None => members.clone(),
        };

        let successor = rotated.first().cloned().unwrap_or_else(|| Finger {
            url: self_url.to_string(),
            id: self_id,
        });
        let predecessor = rotated.last().cloned().unwrap_or_else(|| Finger {
            url: self_url.to_string(),
            id: self_id,
        });

        let mut entries = Vec::with_capacity(160);
        for j in 0..160u32 {
            let target = self_id.plus_pow2(j);
            let owner = rotated
                .iter()
                .find(|f| Id::in_range(self_id.plus_one(), f.id, target))
                .cloned()
                .unwrap_or_else(|| successor.clone());
            entries.push(owner);
        }

        Self {
            entries,
            successor,
            predecessor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solitary_table_points_entirely_at_self() {
        let table = FingerTable::solitary("http://self".to_string());
        let self_id = Id::of("http://self");
        assert_eq!(table.successor().id, self_id);
        assert_eq!(table.predecessor().id, self_id);
        for j in 0..160 {
            assert_eq!(table.entry(j).id, self_id);
        }
    }

    #[test]
    fn lookup_returns_successor_when_h_in_first_arc() {
        let table = FingerTable::solitary("http://self".to_string());
        let self_id = Id::of("http://self");
        let h = self_id.plus_one();
        let found = table.lookup(self_id, h);
        assert_eq!(found.url, "http://self");
    }

    #[test]
    fn rebuild_three_node_ring_successor_and_predecessor_are_neighbors() {
        let ring = vec![
            "http://a".to_string(),
            "http://b".to_string(),
            "http://c".to_string(),
        ];
        let mut sorted = ring.clone();
        sorted.sort_by_key(|u| Id::of(u));

        let middle = &sorted[1];
        let table = FingerTable::rebuild(middle, &ring);
        let expected_succ = &sorted[2];
        let expected_pred = &sorted[0];
        assert_eq!(&table.successor().url, expected_succ);
        assert_eq!(&table.predecessor().url, expected_pred);
    }

    #[test]
    fn rebuild_every_entry_owner_is_a_ring_member() {
        let ring = vec![
            "http://a".to_string(),
            "http://b".to_string(),
            "http://c".to_string(),
            "http://d".to_string(),
        ];
        let table = FingerTable::rebuild("http://a", &ring);
        for j in 0..160 {
            assert!(ring.contains(&table.entry(j).url));
        }
    }

    #[test]
    fn rebuild_entry_covers_its_target_arc() {
        let ring = vec![
            "http://a".to_string(),
            "http://b".to_string(),
            "http://c".to_string(),
        ];
        let self_id = Id::of("http://a");
        let table = FingerTable::rebuild("http://a", &ring);
        for j in 0..160u32 {
            let target = self_id.plus_pow2(j);
            let owner_id = table.entry(j as usize).id;
            assert!(Id::in_range(self_id.plus_one(), owner_id, target));
        }
    }
}
