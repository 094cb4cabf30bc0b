use mesh_patchwork::prelude::*;
use std::thread;

const TAG: u16 = 7;

/// Two 2x1x1 blocks side by side along x, split between two ranks.
fn partition(rank: usize) -> PolyMesh {
    let other = 1 - rank;
    let side = if rank == 0 { Side::XMax } else { Side::XMin };
    BlockMesh::new(2, 1, 1)
        .origin([2.0 * rank as f64, 0.0, 0.0])
        .side(
            side,
            format!("procBoundary{rank}to{other}"),
            PatchKind::Processor {
                my_rank: rank,
                neighbour_rank: other,
                tag: TAG,
            },
        )
        .build()
        .unwrap()
}

fn scheduled_partitions() -> Vec<PolyMesh> {
    let mut meshes = vec![partition(0), partition(1)];
    let graph = CouplingGraph::from_partitions(meshes.iter().map(|m| m.boundary())).unwrap();
    for mesh in &mut meshes {
        let schedule = CommsSchedule::build(mesh.boundary(), &graph).unwrap();
        mesh.set_patch_schedule(schedule).unwrap();
    }
    meshes
}

fn proc_side(rank: usize) -> usize {
    if rank == 0 {
        Side::XMax.index()
    } else {
        Side::XMin.index()
    }
}

#[derive(Debug, PartialEq)]
struct RankResult {
    evaluated: Vec<Vec<f64>>,
    neighbour: Vec<Vec<f64>>,
}

fn run_rank(mesh: &PolyMesh, comm: ThreadComm) -> RankResult {
    let rank = comm.rank();
    let internal: Vec<f64> = if rank == 0 { vec![1.0, 2.0] } else { vec![3.0, 4.0] };
    let factory = PatchFieldFactory::standard();
    let mut bf = BoundaryField::uniform_type(mesh, &internal, "zeroGradient", &factory).unwrap();
    assert_eq!(bf[proc_side(rank)].type_name(), "processor");

    let mut ex = PatchExchange::new(comm, CommsType::Blocking);
    let mut evaluated = Vec::new();
    let mut neighbour = Vec::new();
    for ct in [CommsType::Blocking, CommsType::NonBlocking, CommsType::Scheduled] {
        ex.set_comms_type(ct);
        bf.evaluate(&internal, &ex).unwrap();
        evaluated.push(bf[proc_side(rank)].values().to_vec());
        let nbr = bf.boundary_neighbour_field(&internal, &ex).unwrap();
        neighbour.push(nbr[proc_side(rank)].values().to_vec());
        assert_eq!(ex.n_requests(), 0, "{ct}: requests left behind");
    }
    RankResult { evaluated, neighbour }
}

#[test]
fn disciplines_agree_across_partitions() {
    let meshes = scheduled_partitions();
    let comms = ThreadComm::universe(2);
    let results: Vec<RankResult> = thread::scope(|s| {
        let handles: Vec<_> = meshes
            .iter()
            .zip(comms)
            .map(|(mesh, comm)| s.spawn(move || run_rank(mesh, comm)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    // Face value is the mean of the cells on both sides of the interface.
    for r in &results {
        assert_eq!(r.evaluated, vec![vec![2.5]; 3]);
    }
    assert_eq!(results[0].neighbour, vec![vec![3.0]; 3]);
    assert_eq!(results[1].neighbour, vec![vec![2.0]; 3]);
}

#[test]
fn processor_partitions_need_a_schedule() {
    let mesh = partition(0);
    assert!(matches!(mesh.patch_schedule(), Err(MeshError::MissingSchedule)));
    let internal = [1.0, 2.0];
    let mut bf =
        BoundaryField::uniform_type(&mesh, &internal, "zeroGradient", &PatchFieldFactory::standard()).unwrap();
    let ex = PatchExchange::serial(CommsType::Scheduled);
    assert_eq!(bf.evaluate(&internal, &ex), Err(MeshError::MissingSchedule));
}

#[test]
fn serial_run_skips_processor_exchange() {
    let mesh = partition(1);
    let internal = [3.0, 4.0];
    let mut bf =
        BoundaryField::uniform_type(&mesh, &internal, "zeroGradient", &PatchFieldFactory::standard()).unwrap();
    for ct in [CommsType::Blocking, CommsType::NonBlocking] {
        let ex = PatchExchange::serial(ct);
        bf.evaluate(&internal, &ex).unwrap();
        // Initial value (the adjacent cell) is kept.
        assert_eq!(bf[Side::XMin.index()].values(), &[3.0]);
        assert_eq!(bf[Side::XMax.index()].values(), &[4.0]);
    }
}

#[test]
fn comms_type_comes_from_configuration() {
    let config: ParallelConfig = serde_json::from_str(r#"{"commsType":"scheduled"}"#).unwrap();
    assert_eq!(config.comms_type, CommsType::Scheduled);
    assert_eq!(ParallelConfig::default().comms_type, CommsType::NonBlocking);
    assert!(matches!(
        "eager".parse::<CommsType>(),
        Err(MeshError::UnsupportedCommsType(_))
    ));
}
