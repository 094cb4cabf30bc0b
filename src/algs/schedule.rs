//! Processor coupling graph and the per-partition patch evaluation schedule.
//!
//! The coupling graph is global: one edge per pair of partitions that share
//! a processor interface. Its edges are split into rounds in which every
//! partition talks to at most one neighbour. A partition's
//! [`CommsSchedule`] then lists, for each of its patches, when to start the
//! exchange (`init`) and when to finish it, in an order that is deadlock
//! free when every partition replays its own schedule.

use crate::algs::communicator::{Communicator, Wait};
use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::MeshError;
use crate::topology::index_map::{IndexMap, TopoChangeAware};
use crate::topology::patch::{BoundaryMesh, PatchKind};
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};

/// An edge of the coupling graph, `lower < upper`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessorInterface {
    pub lower: usize,
    pub upper: usize,
}

impl ProcessorInterface {
    pub fn new(a: usize, b: usize) -> Self {
        Self {
            lower: a.min(b),
            upper: a.max(b),
        }
    }

    pub fn touches(&self, rank: usize) -> bool {
        self.lower == rank || self.upper == rank
    }
}

/// Which partitions exchange data with which.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CouplingGraph {
    n_ranks: usize,
    interfaces: Vec<ProcessorInterface>,
}

impl CouplingGraph {
    /// Build from every rank's neighbour list. Each coupling must be
    /// declared by both sides.
    pub fn from_neighbour_lists(lists: &[Vec<usize>]) -> Result<Self, MeshError> {
        let directed: BTreeSet<(usize, usize)> = lists
            .iter()
            .enumerate()
            .flat_map(|(rank, nbrs)| nbrs.iter().map(move |&n| (rank, n)))
            .collect();
        for &(a, b) in &directed {
            if b >= lists.len() || a == b {
                return Err(MeshError::IndexOutOfRange {
                    entity: "rank",
                    index: b,
                    size: lists.len(),
                });
            }
            if !directed.contains(&(b, a)) {
                return Err(MeshError::InvalidMesh(format!(
                    "rank {a} couples to rank {b} but rank {b} has no matching processor patch"
                )));
            }
        }
        let interfaces = directed
            .iter()
            .filter(|(a, b)| a < b)
            .map(|&(a, b)| ProcessorInterface::new(a, b))
            .collect();
        Ok(Self {
            n_ranks: lists.len(),
            interfaces,
        })
    }

    /// Build from the boundaries of all partitions, indexed by rank.
    pub fn from_partitions<'a, I>(boundaries: I) -> Result<Self, MeshError>
    where
        I: IntoIterator<Item = &'a BoundaryMesh>,
    {
        let lists = boundaries
            .into_iter()
            .enumerate()
            .map(|(rank, bmesh)| neighbour_ranks(rank, bmesh))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_neighbour_lists(&lists)
    }

    /// Collective: every rank contributes its neighbour list and receives
    /// everyone else's.
    pub fn gather<C: Communicator>(
        comm: &C,
        bmesh: &BoundaryMesh,
        tag: u16,
    ) -> Result<Self, MeshError> {
        let (rank, size) = (comm.rank(), comm.size());
        let mine: Vec<u64> = neighbour_ranks(rank, bmesh)?.into_iter().map(|n| n as u64).collect();
        let count = [mine.len() as u64];
        for peer in (0..size).filter(|&p| p != rank) {
            comm.isend(peer, tag, bytemuck::cast_slice(&count[..])).wait();
            comm.isend(peer, tag, bytemuck::cast_slice(mine.as_slice())).wait();
        }

        let mut lists = vec![Vec::new(); size];
        lists[rank] = mine.iter().map(|&n| n as usize).collect();
        for peer in (0..size).filter(|&p| p != rank) {
            let lost = |what: &str| MeshError::CommError {
                neighbor: peer,
                message: format!("no {what} received while gathering the coupling graph"),
            };
            let raw = comm.irecv(peer, tag, 8).wait().ok_or_else(|| lost("size"))?;
            let n = decode_u64s(&raw).first().copied().ok_or_else(|| lost("size"))? as usize;
            let raw = comm.irecv(peer, tag, n * 8).wait().ok_or_else(|| lost("list"))?;
            lists[peer] = decode_u64s(&raw).into_iter().map(|v| v as usize).collect();
        }
        Self::from_neighbour_lists(&lists)
    }

    pub fn n_ranks(&self) -> usize {
        self.n_ranks
    }

    pub fn interfaces(&self) -> &[ProcessorInterface] {
        &self.interfaces
    }

    /// Split the interfaces into rounds of disjoint pairs.
    ///
    /// Greedy edge colouring: each round picks edges whose endpoints still
    /// have the most pending interfaces first. Ties break on rank order, so
    /// every partition computes the same rounds.
    pub fn rounds(&self) -> Vec<Vec<ProcessorInterface>> {
        let mut remaining: BTreeSet<ProcessorInterface> = self.interfaces.iter().copied().collect();
        let mut rounds = Vec::new();
        while !remaining.is_empty() {
            let mut degree = vec![0usize; self.n_ranks];
            for e in &remaining {
                degree[e.lower] += 1;
                degree[e.upper] += 1;
            }
            let ordered = remaining
                .iter()
                .copied()
                .sorted_by_key(|e| (std::cmp::Reverse(degree[e.lower].max(degree[e.upper])), *e))
                .collect_vec();
            let mut busy = BTreeSet::new();
            let mut round = Vec::new();
            for e in ordered {
                if !busy.contains(&e.lower) && !busy.contains(&e.upper) {
                    busy.insert(e.lower);
                    busy.insert(e.upper);
                    round.push(e);
                }
            }
            for e in &round {
                remaining.remove(e);
            }
            round.sort_unstable();
            rounds.push(round);
        }
        rounds
    }
}

fn neighbour_ranks(rank: usize, bmesh: &BoundaryMesh) -> Result<Vec<usize>, MeshError> {
    let mut out = BTreeSet::new();
    for patch in bmesh.iter() {
        if let PatchKind::Processor {
            my_rank,
            neighbour_rank,
            ..
        } = patch.kind
        {
            if my_rank != rank {
                return Err(MeshError::InvalidMesh(format!(
                    "processor patch {} claims rank {my_rank} on rank {rank}",
                    patch.name
                )));
            }
            out.insert(neighbour_rank);
        }
    }
    Ok(out.into_iter().collect())
}

fn decode_u64s(raw: &[u8]) -> Vec<u64> {
    raw.chunks_exact(8).map(bytemuck::pod_read_unaligned::<u64>).collect()
}

/// One entry of a patch schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduleStep {
    pub patch: usize,
    /// Start the exchange (`true`) or complete the evaluation (`false`).
    pub init: bool,
}

fn pair(patch: usize) -> [ScheduleStep; 2] {
    [ScheduleStep { patch, init: true }, ScheduleStep { patch, init: false }]
}

/// Ordered patch evaluation steps for one partition.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommsSchedule {
    steps: Vec<ScheduleStep>,
}

impl CommsSchedule {
    /// Schedule for a partition without processor patches: each patch is
    /// started and completed in turn.
    pub fn local(bmesh: &BoundaryMesh) -> Self {
        Self {
            steps: (0..bmesh.len()).flat_map(pair).collect(),
        }
    }

    /// Schedule for one partition of a coupled run.
    ///
    /// Local patches are started and completed first. Processor patches
    /// follow in the round order of `graph`; on each interface the higher
    /// rank sends before it receives and the lower rank receives before it
    /// sends.
    pub fn build(bmesh: &BoundaryMesh, graph: &CouplingGraph) -> Result<Self, MeshError> {
        let mut by_interface: BTreeMap<ProcessorInterface, Vec<(usize, usize)>> = BTreeMap::new();
        let mut local = Vec::new();
        for (patchi, patch) in bmesh.iter().enumerate() {
            match patch.kind {
                PatchKind::Processor {
                    my_rank,
                    neighbour_rank,
                    ..
                } => by_interface
                    .entry(ProcessorInterface::new(my_rank, neighbour_rank))
                    .or_default()
                    .push((patchi, my_rank)),
                _ => local.push(patchi),
            }
        }
        let known: BTreeSet<_> = graph.interfaces().iter().collect();
        if let Some(missing) = by_interface.keys().find(|i| !known.contains(i)) {
            return Err(MeshError::InvalidMesh(format!(
                "processor interface {}-{} is missing from the coupling graph",
                missing.lower, missing.upper
            )));
        }

        let mut steps: Vec<ScheduleStep> = local.iter().flat_map(|&patch| pair(patch)).collect();
        for round in graph.rounds() {
            for iface in round {
                let Some(patches) = by_interface.get(&iface) else {
                    continue;
                };
                for &(patch, my_rank) in patches {
                    let first_init = my_rank == iface.upper;
                    steps.push(ScheduleStep {
                        patch,
                        init: first_init,
                    });
                    steps.push(ScheduleStep {
                        patch,
                        init: !first_init,
                    });
                }
            }
        }

        let schedule = Self { steps };
        schedule.check_against(bmesh)?;
        Ok(schedule)
    }

    pub fn steps(&self) -> &[ScheduleStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The schedule covers exactly the patches of `bmesh`.
    pub fn check_against(&self, bmesh: &BoundaryMesh) -> Result<(), MeshError> {
        self.validate_invariants()?;
        if let Some(step) = self.steps.iter().find(|s| s.patch >= bmesh.len()) {
            return Err(MeshError::IndexOutOfRange {
                entity: "patch",
                index: step.patch,
                size: bmesh.len(),
            });
        }
        if self.steps.len() != 2 * bmesh.len() {
            return Err(MeshError::InvalidMesh(format!(
                "patch schedule has {} steps for {} patches",
                self.steps.len(),
                bmesh.len()
            )));
        }
        Ok(())
    }
}

impl DebugInvariants for CommsSchedule {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "CommsSchedule");
    }

    /// Every scheduled patch has exactly one start and one completion.
    fn validate_invariants(&self) -> Result<(), MeshError> {
        let mut seen: BTreeMap<usize, (usize, usize)> = BTreeMap::new();
        for step in &self.steps {
            let entry = seen.entry(step.patch).or_default();
            if step.init {
                entry.0 += 1;
            } else {
                entry.1 += 1;
            }
        }
        match seen.into_iter().find(|(_, counts)| *counts != (1, 1)) {
            Some((patch, (inits, completes))) => Err(MeshError::InvalidMesh(format!(
                "patch {patch} scheduled with {inits} starts and {completes} completions"
            ))),
            None => Ok(()),
        }
    }
}

impl TopoChangeAware for CommsSchedule {
    /// Renumber patches; patches without a predecessor go first. Fails when coupled patches changed, since the
    /// coupling graph has to be gathered again.
    fn topo_change(&mut self, map: &IndexMap) -> Result<(), MeshError> {
        if map.coupled_patches_changed() {
            return Err(MeshError::InvalidTopoChange(
                "coupled patches changed; rebuild the patch schedule".into(),
            ));
        }
        let patch_map = map.patch_map();
        let kept = self
            .steps
            .iter()
            .filter_map(|s| {
                let patch = patch_map.get(s.patch).copied().flatten()?;
                Some(ScheduleStep { patch, init: s.init })
            })
            .collect_vec();
        let added = map
            .reverse_patch_map()
            .iter()
            .positions(Option::is_none)
            .collect_vec();
        self.steps = added.into_iter().flat_map(pair).chain(kept).collect();
        self.debug_assert_invariants();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::patch::Patch;

    fn proc_patch(name: &str, me: usize, nbr: usize, start: usize) -> Patch {
        Patch::new(
            name,
            PatchKind::Processor {
                my_rank: me,
                neighbour_rank: nbr,
                tag: 0,
            },
            start,
            1,
        )
    }

    #[test]
    fn ring_of_four_needs_two_rounds() {
        let lists = vec![vec![1, 3], vec![0, 2], vec![1, 3], vec![0, 2]];
        let graph = CouplingGraph::from_neighbour_lists(&lists).unwrap();
        let rounds = graph.rounds();
        assert_eq!(rounds.len(), 2);
        for round in &rounds {
            let ranks: Vec<_> = round.iter().flat_map(|e| [e.lower, e.upper]).collect();
            assert_eq!(ranks.iter().unique().count(), ranks.len());
        }
        assert_eq!(rounds.iter().map(Vec::len).sum::<usize>(), 4);
    }

    #[test]
    fn one_sided_coupling_is_rejected() {
        assert!(CouplingGraph::from_neighbour_lists(&[vec![1], vec![]]).is_err());
    }

    #[test]
    fn local_schedule_pairs_each_patch() {
        let bmesh = BoundaryMesh::new(vec![
            Patch::new("a", PatchKind::Normal, 0, 1),
            Patch::new("b", PatchKind::Normal, 1, 1),
        ]);
        let s = CommsSchedule::local(&bmesh);
        let inits: Vec<bool> = s.steps().iter().map(|s| s.init).collect();
        assert_eq!(inits, vec![true, false, true, false]);
        s.check_against(&bmesh).unwrap();
    }

    #[test]
    fn processor_order_depends_on_rank() {
        let graph = CouplingGraph::from_neighbour_lists(&[vec![1], vec![0]]).unwrap();
        let lower = BoundaryMesh::new(vec![
            Patch::new("wall", PatchKind::Normal, 0, 1),
            proc_patch("procBoundary0to1", 0, 1, 1),
        ]);
        let upper = BoundaryMesh::new(vec![proc_patch("procBoundary1to0", 1, 0, 0)]);

        let s0 = CommsSchedule::build(&lower, &graph).unwrap();
        assert_eq!(
            s0.steps(),
            &[
                ScheduleStep { patch: 0, init: true },
                ScheduleStep { patch: 0, init: false },
                ScheduleStep { patch: 1, init: false },
                ScheduleStep { patch: 1, init: true },
            ]
        );
        let s1 = CommsSchedule::build(&upper, &graph).unwrap();
        assert_eq!(
            s1.steps(),
            &[ScheduleStep { patch: 0, init: true }, ScheduleStep { patch: 0, init: false }]
        );
    }

    #[test]
    fn gather_matches_from_partitions() {
        use crate::algs::communicator::ThreadComm;
        let bms = vec![
            BoundaryMesh::new(vec![proc_patch("p01", 0, 1, 0)]),
            BoundaryMesh::new(vec![proc_patch("p10", 1, 0, 0), proc_patch("p12", 1, 2, 1)]),
            BoundaryMesh::new(vec![proc_patch("p21", 2, 1, 0)]),
        ];
        let expected = CouplingGraph::from_partitions(&bms).unwrap();
        let comms = ThreadComm::universe(3);
        std::thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .zip(&bms)
                .map(|(c, b)| s.spawn(move || CouplingGraph::gather(c, b, 11)))
                .collect();
            for h in handles {
                assert_eq!(h.join().unwrap().unwrap(), expected);
            }
        });
    }

    #[test]
    fn renumbering_drops_removed_patches() {
        let bmesh = BoundaryMesh::new(vec![
            Patch::new("a", PatchKind::Normal, 0, 1),
            Patch::new("b", PatchKind::Normal, 1, 1),
        ]);
        let mut s = CommsSchedule::local(&bmesh);
        let mut map = IndexMap::identity(0, 2, 0, 0, &[0..1, 1..2]);
        map.patch_map = vec![None, Some(0)];
        map.reverse_patch_map = vec![Some(1)];
        s.topo_change(&map).unwrap();
        assert_eq!(
            s.steps(),
            &[ScheduleStep { patch: 0, init: true }, ScheduleStep { patch: 0, init: false }]
        );
    }
}
