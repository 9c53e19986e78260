/// Vote-aggregation tree topology.
///
/// A plain synchronous struct with round-robin arithmetic, exhaustively
/// unit-tested — the same idiom `pacemaker` uses for its own scheduling
/// state.
///
/// For the current view the leader is the root of a breadth-first `k`-ary
/// tree over the active replica set. `rotate` on view failure shifts the
/// active ordering by `k+1` slots: the rationale is that the next
/// designated-faulty set moves out of the root region.

use crate::ReplicaId;

#[derive(Clone, Debug)]
pub struct TreeTopology {
    /// The full, fixed replica list; replica IDs and the replica config
    /// persist across view changes even as topology rotates.
    all: Vec<ReplicaId>,
    /// Replicas retired from the active rotation for persistent
    /// unresponsiveness; kept in
    /// `all` so historic blocks signed under them still verify.
    retired: Vec<ReplicaId>,
    /// Breadth-first order of the *active* replicas; index 0 is the root
    /// (the current leader).
    active_order: Vec<ReplicaId>,
    fanout: usize,
    rotations_since_progress: usize,
}

impl TreeTopology {
    /// `order` is the initial active-replica ordering, root first. Every
    /// entry of `order` must be a member of `all`.
    pub fn new(all: Vec<ReplicaId>, order: Vec<ReplicaId>, fanout: usize) -> Self {
        TreeTopology {
            all,
            retired: Vec::new(),
            active_order: order,
            fanout: fanout.max(1),
            rotations_since_progress: 0,
        }
    }

    pub fn root(&self) -> Option<ReplicaId> {
        self.active_order.first().copied()
    }

    pub fn fanout(&self) -> usize {
        self.fanout
    }

    pub fn active(&self) -> &[ReplicaId] {
        &self.active_order
    }

    fn position_of(&self, id: ReplicaId) -> Option<usize> {
        self.active_order.iter().position(|&r| r == id)
    }

    pub fn parent_of(&self, id: ReplicaId) -> Option<ReplicaId> {
        let idx = self.position_of(id)?;
        if idx == 0 {
            return None;
        }
        let parent_idx = (idx - 1) / self.fanout;
        self.active_order.get(parent_idx).copied()
    }

    pub fn children_of(&self, id: ReplicaId) -> Vec<ReplicaId> {
        let idx = match self.position_of(id) {
            Some(i) => i,
            None => return Vec::new(),
        };
        let first_child = idx * self.fanout + 1;
        let last_child = first_child + self.fanout;
        (first_child..last_child)
            .filter_map(|i| self.active_order.get(i).copied())
            .collect()
    }

    /// `numberOfChildren + 1` (self included) — the relay threshold for a
    /// non-root node.
    pub fn relay_threshold(&self, id: ReplicaId) -> usize {
        self.children_of(id).len() + 1
    }

    pub fn is_root(&self, id: ReplicaId) -> bool {
        self.root() == Some(id)
    }

    /// Shift the active ordering by `k+1` slots. Called on pacemaker
    /// view-change. Returns whether this rotation crossed the
    /// without-progress threshold and triggered the star fallback.
    pub fn rotate(&mut self) -> bool {
        let n = self.active_order.len();
        if n == 0 {
            return false;
        }
        let shift = (self.fanout + 1) % n;
        self.active_order.rotate_left(shift);
        self.rotations_since_progress += 1;
        if self.rotations_since_progress >= self.fanout {
            self.fallback_to_star();
            true
        } else {
            false
        }
    }

    pub fn on_progress(&mut self) {
        self.rotations_since_progress = 0;
    }

    pub fn rotations_since_progress(&self) -> usize {
        self.rotations_since_progress
    }

    /// Collapse to a star: if view changes exceed `k` rotations without
    /// progress, widen fanout to the full active set so every vote reaches
    /// the root in one hop, trading bandwidth for correctness. Async
    /// pipelining depth is a pacemaker concern, set by the caller alongside
    /// this call.
    pub fn fallback_to_star(&mut self) {
        self.fanout = self.active_order.len().max(1);
    }

    /// Explicitly promotes `id` to root position, moving the next
    /// known-faulty replica's slot out of the root. Resolved in DESIGN.md
    /// as: move `id` to the front, preserving the relative order of
    /// everyone else.
    pub fn promote(&mut self, id: ReplicaId) {
        if let Some(idx) = self.position_of(id) {
            let r = self.active_order.remove(idx);
            self.active_order.insert(0, r);
        }
    }

    /// Retires `id` from the active rotation; it keeps its place in `all`
    /// for historic certificate verification. Refuses to retire the last
    /// remaining active replica — a fully emptied tree can never make
    /// progress again, which spec.md's liveness property forbids even under
    /// the heuristic retirement policy.
    pub fn retire(&mut self, id: ReplicaId) {
        if self.active_order.len() <= 1 {
            return;
        }
        self.active_order.retain(|&r| r != id);
        if !self.retired.contains(&id) {
            self.retired.push(id);
        }
    }

    pub fn is_retired(&self, id: ReplicaId) -> bool {
        self.retired.contains(&id)
    }

    pub fn all_replicas(&self) -> &[ReplicaId] {
        &self.all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(n: u16, fanout: usize) -> TreeTopology {
        let ids: Vec<ReplicaId> = (0..n).collect();
        TreeTopology::new(ids.clone(), ids, fanout)
    }

    #[test]
    fn seven_replicas_fanout_two_matches_scenario_2() {
        // R0 leader; R0->{R1,R2}, R1->{R3,R4}, R2->{R5,R6}.
        let t = tree(7, 2);
        assert_eq!(t.root(), Some(0));
        assert_eq!(t.children_of(0), vec![1, 2]);
        assert_eq!(t.children_of(1), vec![3, 4]);
        assert_eq!(t.children_of(2), vec![5, 6]);
        assert_eq!(t.parent_of(3), Some(1));
        assert_eq!(t.parent_of(6), Some(2));
        assert_eq!(t.relay_threshold(1), 3);
    }

    #[test]
    fn root_has_no_parent() {
        let t = tree(4, 2);
        assert_eq!(t.parent_of(0), None);
    }

    #[test]
    fn leaves_have_no_children() {
        let t = tree(4, 2);
        assert!(t.children_of(3).is_empty());
    }

    #[test]
    fn rotate_shifts_by_fanout_plus_one() {
        let mut t = tree(4, 1);
        t.rotate();
        assert_eq!(t.active().to_vec(), vec![2, 3, 0, 1]);
    }

    #[test]
    fn repeated_rotation_without_progress_falls_back_to_star() {
        let mut t = tree(7, 2);
        t.rotate();
        t.rotate();
        // rotations_since_progress == fanout(2) triggers the star fallback.
        assert_eq!(t.fanout(), 7);
        assert!(t.children_of(0).len() == 6);
    }

    #[test]
    fn progress_resets_the_rotation_counter() {
        let mut t = tree(7, 2);
        t.rotate();
        t.on_progress();
        t.rotate();
        assert_eq!(t.fanout(), 2); // didn't hit the fallback threshold
    }

    #[test]
    fn promote_moves_replica_to_root() {
        let mut t = tree(4, 2);
        t.promote(3);
        assert_eq!(t.root(), Some(3));
    }

    #[test]
    fn retire_removes_from_active_but_keeps_in_all() {
        let mut t = tree(7, 2);
        t.retire(5);
        assert!(!t.active().contains(&5));
        assert!(t.all_replicas().contains(&5));
        assert!(t.is_retired(5));
    }

    #[test]
    fn retire_refuses_to_empty_the_active_set() {
        let mut t = TreeTopology::new(vec![0, 1], vec![0, 1], 1);
        t.retire(1);
        assert!(!t.active().contains(&1));
        t.retire(0);
        // would leave zero active replicas — refused.
        assert_eq!(t.active(), &[0]);
        assert!(!t.is_retired(0));
    }
}
