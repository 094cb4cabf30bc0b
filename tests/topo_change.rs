use mesh_patchwork::prelude::*;
use mesh_patchwork::topology::remove_faces::AcceptAllMerges;
use mesh_patchwork::topology::topo_change::FaceChange;
use proptest::prelude::*;

/// Merge cells 1 and 2 of a 3x1x1 row.
fn merge_tail() -> (PolyMesh, PolyMesh, IndexMap) {
    let old = BlockMesh::new(3, 1, 1).build().unwrap();
    let mut mesh = old.clone();
    let mut remover = FaceRemover::<AcceptAllMerges>::default();
    let removes = remover.compatible_removes(&mesh, &[1]);
    let mut change = TopoChange::new(&mesh);
    remover.set_refinement(&mesh, &removes, &mut change).unwrap();
    let map = change.commit(&mut mesh).unwrap();
    remover.topo_change(&map).unwrap();
    assert_eq!(remover.merged_cells(), &[1]);
    (old, mesh, map)
}

#[test]
fn merge_shrinks_mesh_and_records_sources() {
    let (old, mesh, map) = merge_tail();
    assert_eq!(mesh.n_cells(), 2);
    assert_eq!(mesh.n_faces(), old.n_faces() - 1);
    assert_eq!(mesh.n_internal_faces(), 1);
    assert_eq!(mesh.n_points(), old.n_points());
    mesh.validate_invariants().unwrap();

    assert_eq!(map.cell_map(), &[Some(0), Some(1), None]);
    assert_eq!(map.cell_sources(), &[vec![0], vec![1, 2]]);
    assert_eq!(map.merged_cell(2), Some(1));
    assert_eq!(map.merged_cell_map(), &[Some(0), Some(1), Some(1)]);
    assert_eq!(map.face_map()[1], None);
    assert_eq!(map.added_cells().count(), 0);
    assert!(!map.coupled_patches_changed());
    assert!(!map.has_motion_points());

    // Forward and reverse tables agree on every survivor.
    for (old_face, new) in map.face_map().iter().enumerate() {
        if let Some(new) = new {
            assert_eq!(map.reverse_face_map()[*new], Some(old_face));
        }
    }
    // The xMax face now belongs to the merged cell.
    let xmax = &mesh.boundary()[Side::XMax.index()];
    assert_eq!(mesh.owner()[xmax.start], 1);
}

#[test]
fn fields_follow_the_merge() {
    let (old, mesh, map) = merge_tail();
    let dict = PatchFieldDict::new()
        .with("xMin", PatchFieldEntry::uniform("fixedValue", 0.0))
        .unwrap()
        .with("walls", PatchFieldEntry::of_type("zeroGradient"))
        .unwrap();
    let record = FieldRecord::new("T", vec![1.0, 2.0, 4.0], dict);
    let field = VolField::read(&old, &record, &PatchFieldFactory::standard()).unwrap();
    let mut field = field.topo_change(&mesh, &map).unwrap();
    assert_eq!(field.internal(), &[1.0, 3.0]);
    assert_eq!(field.boundary()[Side::XMin.index()].values(), &[0.0]);
    assert_eq!(field.boundary()[Side::YMin.index()].values(), &[1.0, 2.0, 4.0]);

    field
        .correct_boundary_conditions(&PatchExchange::serial(CommsType::Scheduled))
        .unwrap();
    assert_eq!(field.boundary()[Side::XMax.index()].values(), &[3.0]);
    assert_eq!(field.boundary()[Side::YMin.index()].values(), &[1.0, 3.0, 3.0]);
}

#[test]
fn schedule_and_sets_survive_commit() {
    let (_, mesh, map) = merge_tail();
    assert_eq!(mesh.patch_schedule().unwrap(), &CommsSchedule::local(mesh.boundary()));

    let mut set = FaceSet::new("cands", [0, 1, 2]);
    set.topo_change(&map).unwrap();
    assert_eq!(set.to_vec(), vec![0, 1]);
}

#[test]
fn rejected_batch_leaves_mesh_untouched() {
    let mut mesh = BlockMesh::new(2, 1, 1).build().unwrap();
    let before = mesh.clone();
    let mut change = TopoChange::new(&mesh);
    // Cell 1 goes away but its faces stay.
    change.remove_cell(1, None).unwrap();
    assert!(matches!(change.commit(&mut mesh), Err(MeshError::InvalidTopoChange(_))));
    assert_eq!(mesh.faces(), before.faces());
    assert_eq!(mesh.n_cells(), 2);
}

#[test]
fn dropping_a_processor_patch_invalidates_the_schedule() {
    // Middle rank of three in a row.
    let processor = |side, nbr: usize| {
        (
            side,
            format!("procBoundary1to{nbr}"),
            PatchKind::Processor {
                my_rank: 1,
                neighbour_rank: nbr,
                tag: nbr as u16,
            },
        )
    };
    let mut block = BlockMesh::new(2, 1, 1);
    for (side, name, kind) in [processor(Side::XMin, 0), processor(Side::XMax, 2)] {
        block = block.side(side, name, kind);
    }
    let mut mesh = block.build().unwrap();
    let graph = CouplingGraph::from_neighbour_lists(&[vec![1], vec![0, 2], vec![1]]).unwrap();
    let schedule = CommsSchedule::build(mesh.boundary(), &graph).unwrap();
    mesh.set_patch_schedule(schedule).unwrap();

    // Turn the face towards rank 0 into a yMin face and drop that patch.
    let xmin = Side::XMin.index();
    let face = mesh.boundary()[xmin].start;
    let mut change = TopoChange::new(&mesh);
    let mut moved = FaceChange::from_mesh(&mesh, face).unwrap();
    moved.patch = Some(Side::YMin.index());
    change.modify_face(face, moved).unwrap();
    change.remove_patch(xmin).unwrap();
    let map = change.commit(&mut mesh).unwrap();

    assert!(map.coupled_patches_changed());
    assert_eq!(map.patch_map()[xmin], None);
    assert_eq!(mesh.boundary().len(), 5);
    assert_eq!(mesh.boundary()[Side::YMin.index() - 1].size, 3);
    assert!(matches!(mesh.patch_schedule(), Err(MeshError::MissingSchedule)));
}

proptest! {
    #[test]
    fn prop_index_map_tables_are_inverse(
        candidates in proptest::collection::vec(0usize..20, 1..10),
    ) {
        let mut mesh = BlockMesh::new(3, 2, 2).build().unwrap();
        let n_old_cells = mesh.n_cells();
        let mut remover = FaceRemover::<AcceptAllMerges>::default();
        let removes = remover.compatible_removes(&mesh, &candidates);
        let mut change = TopoChange::new(&mesh);
        remover.set_refinement(&mesh, &removes, &mut change).unwrap();
        let map = change.commit(&mut mesh).unwrap();

        prop_assert_eq!(map.n_old_cells(), n_old_cells);
        let merged_away: usize = (0..removes.n_regions())
            .map(|r| removes.region_cells(r).len() - 1)
            .sum();
        prop_assert_eq!(mesh.n_cells(), n_old_cells - merged_away);
        for (old, new) in map.cell_map().iter().enumerate() {
            if let Some(new) = new {
                prop_assert_eq!(map.reverse_cell_map()[*new], Some(old));
            }
        }
        for (old, new) in map.face_map().iter().enumerate() {
            if let Some(new) = new {
                prop_assert_eq!(map.reverse_face_map()[*new], Some(old));
            }
        }
        let covered: usize = map.cell_sources().iter().map(Vec::len).sum();
        prop_assert_eq!(covered, n_old_cells);
        prop_assert!(mesh.validate_invariants().is_ok());
    }
}
