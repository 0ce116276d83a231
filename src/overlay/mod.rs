//! Pipe registry and allocator.
//!
//! Owns the fixed array of hardware pipe slots and runs the per-round
//! allocation protocol: `config_begin`, any number of `next_pipe` /
//! parameter pushes / `commit` calls, then `config_done`. A commit failure
//! rolls back every pipe of the affected display; other displays are
//! untouched. Slots keep their owning display across rounds so a display
//! re-acquiring pipes gets the ones it already programmed.

mod pipe;

use std::fmt::Write as _;

use anyhow::ensure;
use tracing::{debug, warn};

pub use pipe::{
    PipeArgs, PipeFlags, PipeHandle, PipeId, PipeKind, PipeSummary, Rect, SlotState, Transform,
    VisualParams,
};
use pipe::Slot;

use crate::backend::{Capabilities, PipeBackend};
use crate::comp::Display;

pub struct Overlay<B: PipeBackend> {
    backend: B,
    slots: Vec<Slot<B::Handle>>,
    /// Committed-slot bitmap saved at the end of the previous round. Used to
    /// skip teardown entirely when usage did not change.
    last_used: u64,
    /// Human-readable pipes-gained/lost log for the current round.
    /// Diagnostic only.
    change_log: String,
    /// Raised when `config_done` tears a pipe down: the next display commit
    /// must block until the kernel has released the pipe.
    wait_for_finish: bool,
}

impl<B: PipeBackend> Overlay<B> {
    /// Builds the slot table from capability-reported counts, grouped by
    /// kind: all RGB pipes first, then VG, then DMA.
    pub fn new(backend: B, caps: &Capabilities) -> anyhow::Result<Self> {
        let total = caps.total_pipes();
        ensure!(total > 0, "capability source reported no pipes");
        ensure!(total <= 64, "more pipes ({total}) than the bitmap can track");

        let mut slots = Vec::with_capacity(total);
        for _ in 0..caps.rgb_pipes {
            slots.push(Slot::new(PipeKind::Rgb));
        }
        for _ in 0..caps.vg_pipes {
            slots.push(Slot::new(PipeKind::Vg));
        }
        for _ in 0..caps.dma_pipes {
            slots.push(Slot::new(PipeKind::Dma));
        }

        debug!(
            "pipe layout: {} RGB, {} VG, {} DMA (mdp v{})",
            caps.rgb_pipes, caps.vg_pipes, caps.dma_pipes, caps.mdp_version,
        );

        Ok(Self {
            backend,
            slots,
            last_used: 0,
            change_log: String::new(),
            wait_for_finish: false,
        })
    }

    /// Opens a new allocation round. Must be called exactly once before any
    /// `next_pipe` in a composition cycle.
    pub fn config_begin(&mut self) {
        for slot in &mut self.slots {
            slot.state = SlotState::Free;
        }
        self.change_log.clear();
    }

    /// Hands out a free slot of the requested kind (`None` = any kind) to
    /// `dpy`. Prefers a slot the display already owns from a previous round;
    /// falls back to an unowned slot. Returns `None` when nothing matches;
    /// the caller renders that layer through a fallback path.
    pub fn next_pipe(&mut self, kind: Option<PipeKind>, dpy: Display) -> Option<PipeId> {
        let matches = |slot: &Slot<B::Handle>| kind.map_or(true, |k| k == slot.kind);

        let mut dest = self.slots.iter().position(|slot| {
            matches(slot) && slot.owner == Some(dpy) && slot.state == SlotState::Free
        });

        if dest.is_none() {
            dest = self.slots.iter().position(|slot| {
                matches(slot) && slot.owner.is_none() && slot.state == SlotState::Free
            });
        }

        let Some(index) = dest else {
            debug!("pipe unavailable: kind={kind:?} display={}", dpy.name());
            return None;
        };

        let name = self.slot_name(index);
        let slot = &mut self.slots[index];
        slot.state = SlotState::Allocated;
        slot.owner = Some(dpy);

        if slot.handle.is_none() {
            // First binding, or ownership transferred from a display that let
            // the pipe go.
            match self.backend.open_pipe(dpy) {
                Ok(handle) => {
                    slot.handle = Some(handle);
                    let _ = write!(self.change_log, "Set pipe={name} dpy={}; ", dpy.name());
                }
                Err(err) => {
                    warn!("error opening pipe {name}: {err:?}");
                    slot.state = SlotState::Free;
                    slot.owner = None;
                    return None;
                }
            }
        }

        Some(PipeId(index))
    }

    /// Applies the staged configuration of one pipe to hardware.
    ///
    /// On failure every slot of the same display is rolled back to `Free`
    /// and its session forced to a safe state: a partial commit across a
    /// display's pipes would leave the mixer half-programmed.
    pub fn commit(&mut self, dest: PipeId) -> bool {
        let name = self.slot_name(dest.0);
        let slot = &mut self.slots[dest.0];
        let Some(dpy) = slot.owner else {
            warn!("commit on unowned pipe {name}");
            return false;
        };
        let Some(handle) = slot.handle.as_mut() else {
            warn!("commit on pipe {name} with no session");
            return false;
        };

        if handle.commit() {
            slot.state = SlotState::Committed;
            // The tertiary display shares its DMA pipe with other clients
            // which may change format/size underneath us; re-arm so the next
            // commit writes the full configuration again.
            if dpy == Display::Tertiary {
                handle.force_set();
            }
            return true;
        }

        warn!("commit failed on {name}; rolling back {}", dpy.name());
        for slot in &mut self.slots {
            if slot.owner == Some(dpy) {
                slot.state = SlotState::Free;
                if let Some(handle) = slot.handle.as_mut() {
                    handle.force_set();
                }
            }
        }
        false
    }

    /// Queues a buffer on a pipe. Only legal after a successful `commit` in
    /// the same round; anything else is dropped.
    pub fn queue_buffer(&mut self, dest: PipeId, fd: i32, offset: u32) -> bool {
        let slot = &mut self.slots[dest.0];
        if slot.state != SlotState::Committed {
            return false;
        }
        match slot.handle.as_mut() {
            Some(handle) => handle.queue_buffer(fd, offset),
            None => false,
        }
    }

    pub fn set_crop(&mut self, dest: PipeId, crop: Rect) {
        if let Some(handle) = self.slots[dest.0].handle.as_mut() {
            handle.set_crop(crop);
        }
    }

    pub fn set_position(&mut self, dest: PipeId, pos: Rect) {
        if let Some(handle) = self.slots[dest.0].handle.as_mut() {
            handle.set_position(pos);
        }
    }

    pub fn set_transform(&mut self, dest: PipeId, transform: Transform) {
        if let Some(handle) = self.slots[dest.0].handle.as_mut() {
            handle.set_transform(transform);
        }
    }

    /// Pushes source parameters, normalizing capability flags for the slot
    /// kind first so callers need not know which kind they were handed.
    pub fn set_source(&mut self, dest: PipeId, args: PipeArgs) {
        let slot = &mut self.slots[dest.0];

        let mut args = args;
        if slot.kind == PipeKind::Vg {
            args.flags.insert(PipeFlags::SHARE);
        } else {
            args.flags.remove(PipeFlags::SHARE);
        }
        if slot.kind == PipeKind::Dma {
            args.flags.insert(PipeFlags::FORCE_DMA);
        } else {
            args.flags.remove(PipeFlags::FORCE_DMA);
        }

        if let Some(handle) = slot.handle.as_mut() {
            handle.set_source(args);
        }
    }

    pub fn set_visual_params(&mut self, dest: PipeId, params: VisualParams) {
        if let Some(handle) = self.slots[dest.0].handle.as_mut() {
            handle.set_visual_params(params);
        }
    }

    /// Closes the round: tears down every pipe that did not commit this
    /// round and saves the usage snapshot.
    ///
    /// Fast path: when the committed set is identical to the previous
    /// round's there is nothing to tear down and nothing observable happens.
    pub fn config_done(&mut self) {
        self.wait_for_finish = false;

        let used = self.used_bitmap();
        if used == self.last_used {
            return;
        }

        for index in 0..self.slots.len() {
            let name = self.slot_name(index);
            let slot = &mut self.slots[index];
            if slot.state == SlotState::Committed {
                continue;
            }

            if slot.handle.is_some() {
                let dpy = slot.owner.map_or("-", Display::name);
                let _ = write!(self.change_log, "Unset pipe={name} dpy={dpy}; ");
                slot.handle = None;
                // The kernel releases the pipe only once the next commit
                // finishes; make that commit blocking.
                self.wait_for_finish = true;
            }
            slot.owner = None;
            slot.state = SlotState::Free;
        }

        if !self.change_log.is_empty() {
            debug!("pipe changes: {}", self.change_log);
        }
        self.last_used = used;
    }

    /// Out-of-cycle release when a display powers off: its pipes become
    /// available again and their sessions are forced safe. Sessions stay
    /// open so a quick power cycle reuses them.
    pub fn clear(&mut self, dpy: Display) {
        for slot in &mut self.slots {
            if slot.owner == Some(dpy) {
                slot.state = SlotState::Free;
                if let Some(handle) = slot.handle.as_mut() {
                    handle.force_set();
                }
            }
        }
    }

    /// Whether the next display commit must wait for the kernel to finish
    /// releasing pipes torn down by the last `config_done`.
    pub fn wait_for_finish(&self) -> bool {
        self.wait_for_finish
    }

    /// Consumes the teardown latch; the caller passes the result to the
    /// display commit.
    pub fn take_wait_for_finish(&mut self) -> bool {
        std::mem::take(&mut self.wait_for_finish)
    }

    pub fn kind(&self, dest: PipeId) -> PipeKind {
        self.slots[dest.0].kind
    }

    pub fn owner(&self, dest: PipeId) -> Option<Display> {
        self.slots[dest.0].owner
    }

    pub fn is_committed(&self, dest: PipeId) -> bool {
        self.slots[dest.0].state == SlotState::Committed
    }

    pub fn has_session(&self, dest: PipeId) -> bool {
        self.slots[dest.0].handle.is_some()
    }

    /// The current round's pipes-gained/lost log. Diagnostic only.
    pub fn change_log(&self) -> &str {
        &self.change_log
    }

    /// Human-readable registry state.
    pub fn dump(&self) -> String {
        let mut buf = String::new();
        buf.push_str("Overlay State\n==========================\n");
        let mut total = 0;
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.handle.is_some() && slot.state == SlotState::Committed {
                let _ = writeln!(
                    buf,
                    "{} -> dpy={}",
                    self.slot_name(index),
                    slot.owner.map_or("-", Display::name),
                );
                if let Some(handle) = slot.handle.as_ref() {
                    handle.append_dump(&mut buf);
                }
                total += 1;
            }
        }
        let _ = writeln!(buf, "Pipes used={total}");
        buf
    }

    /// Per-slot summary for the CLI's JSON output.
    pub fn summary(&self) -> Vec<PipeSummary> {
        (0..self.slots.len())
            .map(|index| {
                let slot = &self.slots[index];
                PipeSummary {
                    name: self.slot_name(index),
                    kind: slot.kind,
                    display: slot.owner.map(Display::name),
                    committed: slot.state == SlotState::Committed,
                }
            })
            .collect()
    }

    fn used_bitmap(&self) -> u64 {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state == SlotState::Committed)
            .fold(0, |bits, (i, _)| bits | (1 << i))
    }

    /// Name of a slot by kind and position within its kind group, e.g.
    /// "VG1".
    fn slot_name(&self, index: usize) -> String {
        let kind = self.slots[index].kind;
        let nth = self.slots[..index].iter().filter(|s| s.kind == kind).count();
        format!("{}{nth}", kind.as_str())
    }

    #[cfg(test)]
    pub(crate) fn verify_invariants(&self) {
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.state == SlotState::Committed {
                assert!(
                    slot.handle.is_some(),
                    "committed slot {index} must have a session"
                );
                assert!(
                    slot.owner.is_some(),
                    "committed slot {index} must have an owner"
                );
            }
            if slot.owner.is_none() {
                assert!(
                    slot.state == SlotState::Free,
                    "unowned slot {index} must be free"
                );
            }
        }
    }

    /// Checks the post-`config_done` guarantee: unowned slots hold no
    /// session.
    #[cfg(test)]
    pub(crate) fn verify_no_leaks(&self) {
        self.verify_invariants();
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.owner.is_none() {
                assert!(
                    slot.handle.is_none(),
                    "unowned slot {index} leaked a session"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::rc::Rc;

    use insta::assert_snapshot;
    use proptest::prelude::*;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Commit(u32),
        ForceSet(u32),
        Queue(u32),
        Source(u32, PipeFlags),
        Drop(u32),
    }

    #[derive(Default)]
    struct Shared {
        events: RefCell<Vec<Event>>,
        fail_commits: RefCell<HashSet<u32>>,
    }

    struct FakePipe {
        serial: u32,
        shared: Rc<Shared>,
    }

    impl Drop for FakePipe {
        fn drop(&mut self) {
            self.shared.events.borrow_mut().push(Event::Drop(self.serial));
        }
    }

    impl PipeHandle for FakePipe {
        fn commit(&mut self) -> bool {
            self.shared.events.borrow_mut().push(Event::Commit(self.serial));
            !self.shared.fail_commits.borrow().contains(&self.serial)
        }

        fn queue_buffer(&mut self, _fd: i32, _offset: u32) -> bool {
            self.shared.events.borrow_mut().push(Event::Queue(self.serial));
            true
        }

        fn set_crop(&mut self, _crop: Rect) {}
        fn set_position(&mut self, _pos: Rect) {}
        fn set_transform(&mut self, _transform: Transform) {}

        fn set_source(&mut self, args: PipeArgs) {
            self.shared
                .events
                .borrow_mut()
                .push(Event::Source(self.serial, args.flags));
        }

        fn set_visual_params(&mut self, _params: VisualParams) {}

        fn force_set(&mut self) {
            self.shared
                .events
                .borrow_mut()
                .push(Event::ForceSet(self.serial));
        }

        fn append_dump(&self, buf: &mut String) {
            buf.push_str(&format!("  session #{}\n", self.serial));
        }
    }

    struct FakeBackend {
        next_serial: u32,
        shared: Rc<Shared>,
    }

    impl FakeBackend {
        fn new(shared: Rc<Shared>) -> Self {
            Self {
                next_serial: 0,
                shared,
            }
        }
    }

    impl crate::backend::PipeBackend for FakeBackend {
        type Handle = FakePipe;

        fn open_pipe(&mut self, _dpy: Display) -> anyhow::Result<FakePipe> {
            let serial = self.next_serial;
            self.next_serial += 1;
            Ok(FakePipe {
                serial,
                shared: self.shared.clone(),
            })
        }
    }

    fn caps(rgb: usize, vg: usize, dma: usize) -> Capabilities {
        Capabilities {
            rgb_pipes: rgb,
            vg_pipes: vg,
            dma_pipes: dma,
            mdp_version: 500,
        }
    }

    fn overlay(rgb: usize, vg: usize, dma: usize) -> (Overlay<FakeBackend>, Rc<Shared>) {
        let shared = Rc::new(Shared::default());
        let ov = Overlay::new(FakeBackend::new(shared.clone()), &caps(rgb, vg, dma)).unwrap();
        (ov, shared)
    }

    #[test]
    fn layout_groups_by_kind() {
        let (mut ov, _) = overlay(2, 2, 1);
        ov.config_begin();
        let vg = ov.next_pipe(Some(PipeKind::Vg), Display::Primary).unwrap();
        assert_eq!(vg.index(), 2);
        assert_eq!(ov.kind(vg), PipeKind::Vg);
        let dma = ov.next_pipe(Some(PipeKind::Dma), Display::Primary).unwrap();
        assert_eq!(dma.index(), 4);
    }

    #[test]
    fn no_double_allocation_within_a_round() {
        let (mut ov, _) = overlay(1, 2, 0);
        ov.config_begin();
        let a = ov.next_pipe(Some(PipeKind::Vg), Display::Primary).unwrap();
        let b = ov.next_pipe(Some(PipeKind::Vg), Display::Primary).unwrap();
        assert_ne!(a, b);
        assert_eq!(ov.next_pipe(Some(PipeKind::Vg), Display::Primary), None);
    }

    #[test]
    fn any_kind_takes_first_free_slot() {
        let (mut ov, _) = overlay(1, 1, 1);
        ov.config_begin();
        let a = ov.next_pipe(None, Display::External).unwrap();
        assert_eq!(a.index(), 0);
    }

    #[test]
    fn continuity_prefers_previously_owned_slot() {
        let (mut ov, _) = overlay(0, 2, 0);

        // Bind VG1 to external by exhausting VG0 on primary first.
        ov.config_begin();
        let p = ov.next_pipe(Some(PipeKind::Vg), Display::Primary).unwrap();
        let e = ov.next_pipe(Some(PipeKind::Vg), Display::External).unwrap();
        assert!(ov.commit(p));
        assert!(ov.commit(e));
        ov.config_done();

        // Next round both slots are free, but external must get its own
        // slot back even though VG0 has a lower index.
        ov.config_begin();
        let again = ov.next_pipe(Some(PipeKind::Vg), Display::External).unwrap();
        assert_eq!(again, e);
    }

    #[test]
    fn exhaustion_is_a_soft_failure() {
        let (mut ov, _) = overlay(1, 0, 0);
        ov.config_begin();
        assert!(ov.next_pipe(Some(PipeKind::Rgb), Display::Primary).is_some());
        assert_eq!(ov.next_pipe(Some(PipeKind::Rgb), Display::External), None);
        // A different kind is also exhausted (none exist).
        assert_eq!(ov.next_pipe(Some(PipeKind::Vg), Display::Primary), None);
    }

    #[test]
    fn commit_failure_rolls_back_whole_display() {
        let (mut ov, shared) = overlay(2, 1, 0);
        ov.config_begin();
        let a = ov.next_pipe(Some(PipeKind::Rgb), Display::External).unwrap();
        let b = ov.next_pipe(Some(PipeKind::Vg), Display::External).unwrap();
        let p = ov.next_pipe(Some(PipeKind::Rgb), Display::Primary).unwrap();

        assert!(ov.commit(a));
        assert!(ov.commit(p));

        // Sessions were created in acquisition order: a=0, b=1, p=2.
        shared.fail_commits.borrow_mut().insert(1);
        assert!(!ov.commit(b));

        // Both external slots are rolled back, primary is untouched.
        assert!(!ov.is_committed(a));
        assert!(!ov.is_committed(b));
        assert!(ov.is_committed(p));
        let events = shared.events.borrow();
        assert!(events.contains(&Event::ForceSet(0)));
        assert!(events.contains(&Event::ForceSet(1)));
        assert!(!events.contains(&Event::ForceSet(2)));
        drop(events);

        // The rolled-back slots are allocatable again within the round.
        assert!(ov.next_pipe(Some(PipeKind::Rgb), Display::External).is_some());
    }

    #[test]
    fn queue_requires_successful_commit() {
        let (mut ov, shared) = overlay(1, 0, 0);
        ov.config_begin();
        let a = ov.next_pipe(Some(PipeKind::Rgb), Display::Primary).unwrap();

        assert!(!ov.queue_buffer(a, 7, 0), "queue before commit must fail");

        shared.fail_commits.borrow_mut().insert(0);
        assert!(!ov.commit(a));
        assert!(!ov.queue_buffer(a, 7, 0), "queue after failed commit");
        assert!(!shared.events.borrow().iter().any(|e| matches!(e, Event::Queue(_))));

        shared.fail_commits.borrow_mut().clear();
        let a = ov.next_pipe(Some(PipeKind::Rgb), Display::Primary).unwrap();
        assert!(ov.commit(a));
        assert!(ov.queue_buffer(a, 7, 0));
    }

    #[test]
    fn config_done_destroys_unused_sessions() {
        let (mut ov, shared) = overlay(2, 0, 0);
        ov.config_begin();
        let a = ov.next_pipe(Some(PipeKind::Rgb), Display::Primary).unwrap();
        let b = ov.next_pipe(Some(PipeKind::Rgb), Display::External).unwrap();
        assert!(ov.commit(a));
        assert!(ov.commit(b));
        ov.config_done();
        assert!(!ov.wait_for_finish());

        // Next round external drops out.
        ov.config_begin();
        let a = ov.next_pipe(Some(PipeKind::Rgb), Display::Primary).unwrap();
        assert!(ov.commit(a));
        ov.config_done();

        assert!(ov.wait_for_finish());
        assert!(!ov.has_session(b));
        assert_eq!(ov.owner(b), None);
        assert!(shared.events.borrow().contains(&Event::Drop(1)));
        ov.verify_no_leaks();
    }

    #[test]
    fn config_done_is_noop_when_usage_unchanged() {
        let (mut ov, shared) = overlay(1, 1, 0);
        ov.config_begin();
        let a = ov.next_pipe(Some(PipeKind::Rgb), Display::Primary).unwrap();
        assert!(ov.commit(a));
        ov.config_done();

        let events_before = shared.events.borrow().len();
        ov.config_begin();
        let a = ov.next_pipe(Some(PipeKind::Rgb), Display::Primary).unwrap();
        assert!(ov.commit(a));
        ov.config_done();

        assert!(!ov.wait_for_finish());
        assert!(ov.has_session(a));
        // One commit, nothing else: no teardown happened.
        assert_eq!(shared.events.borrow().len(), events_before + 1);
        assert_eq!(ov.change_log(), "");
    }

    #[test]
    fn clear_releases_but_keeps_sessions() {
        let (mut ov, shared) = overlay(1, 1, 0);
        ov.config_begin();
        let a = ov.next_pipe(Some(PipeKind::Rgb), Display::External).unwrap();
        assert!(ov.commit(a));

        ov.clear(Display::External);
        assert!(!ov.is_committed(a));
        assert_eq!(ov.owner(a), Some(Display::External));
        assert!(ov.has_session(a));
        assert!(shared.events.borrow().contains(&Event::ForceSet(0)));
    }

    #[test]
    fn tertiary_commit_rearms_the_session() {
        let (mut ov, shared) = overlay(0, 0, 1);
        ov.config_begin();
        let a = ov.next_pipe(Some(PipeKind::Dma), Display::Tertiary).unwrap();
        assert!(ov.commit(a));
        let events = shared.events.borrow();
        assert_eq!(&*events, &[Event::Commit(0), Event::ForceSet(0)]);
    }

    #[test]
    fn source_flags_normalized_per_kind() {
        let (mut ov, shared) = overlay(1, 1, 1);
        ov.config_begin();
        let rgb = ov.next_pipe(Some(PipeKind::Rgb), Display::Primary).unwrap();
        let vg = ov.next_pipe(Some(PipeKind::Vg), Display::Primary).unwrap();
        let dma = ov.next_pipe(Some(PipeKind::Dma), Display::Primary).unwrap();

        let args = PipeArgs {
            width: 64,
            height: 64,
            format: 0,
            z_order: 0,
            // Caller sets both flags; the registry must fix them up.
            flags: PipeFlags::SHARE | PipeFlags::FORCE_DMA,
        };
        ov.set_source(rgb, args);
        ov.set_source(vg, args);
        ov.set_source(dma, args);

        let events = shared.events.borrow();
        assert_eq!(
            &*events,
            &[
                Event::Source(0, PipeFlags::empty()),
                Event::Source(1, PipeFlags::SHARE),
                Event::Source(2, PipeFlags::FORCE_DMA),
            ],
        );
    }

    #[test]
    fn dump_snapshot() {
        let (mut ov, _) = overlay(1, 1, 1);
        ov.config_begin();
        let rgb = ov.next_pipe(Some(PipeKind::Rgb), Display::Primary).unwrap();
        let vg = ov.next_pipe(Some(PipeKind::Vg), Display::External).unwrap();
        assert!(ov.commit(rgb));
        assert!(ov.commit(vg));
        ov.config_done();

        assert_snapshot!(ov.dump(), @r"
        Overlay State
        ==========================
        RGB0 -> dpy=primary
          session #0
        VG0 -> dpy=external
          session #1
        Pipes used=2
        ");
    }

    proptest! {
        /// Arbitrary interleavings of rounds never hand a slot out twice in
        /// one round and never leak a session across `config_done`.
        #[test]
        fn rounds_never_leak_or_double_allocate(
            rounds in proptest::collection::vec(
                proptest::collection::vec((0u8..4, 0u8..4, any::<bool>()), 0..8),
                1..8,
            ),
        ) {
            let (mut ov, _shared) = overlay(2, 2, 2);
            for round in rounds {
                ov.config_begin();
                let mut handed_out = HashSet::new();
                for (kind, dpy, do_commit) in round {
                    let kind = match kind {
                        0 => Some(PipeKind::Rgb),
                        1 => Some(PipeKind::Vg),
                        2 => Some(PipeKind::Dma),
                        _ => None,
                    };
                    let dpy = Display::ALL[dpy as usize];
                    if let Some(id) = ov.next_pipe(kind, dpy) {
                        prop_assert!(handed_out.insert(id), "slot handed out twice");
                        if do_commit {
                            ov.commit(id);
                        }
                    }
                }
                ov.verify_invariants();
                ov.config_done();
                ov.verify_no_leaks();
            }
        }
    }
}
