//! Remove a set of internal faces, merging the cells on either side.
//!
//! The candidate set is first reduced to a compatible subset, which is
//! written back as the `compatibleRemoves` face set. Fields stored in the
//! case are carried over to the new mesh unless `--no-fields` is given.

use anyhow::Context;
use clap::Parser;
use log::LevelFilter;
use mesh_patchwork::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "remove-faces")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Remove internal faces and merge the adjacent cells", long_about = None)]
struct Cli {
    /// Name of the candidate face set under `<case>/sets/`
    face_set: String,

    /// Case directory
    #[arg(long, default_value = ".")]
    case: std::path::PathBuf,

    /// Write results over the input instead of a new time directory
    #[arg(long)]
    overwrite: bool,

    /// Do not read or remap stored fields
    #[arg(long)]
    no_fields: bool,

    /// Upper bound on the number of cells merged into one
    #[arg(long)]
    max_region_cells: Option<usize>,

    /// Log level (trace, debug, info, warn, error); `RUST_LOG` applies when unset
    #[arg(short, long)]
    log_level: Option<String>,
}

/// A stored field resolved on the mesh before the change.
enum Field<'m> {
    Scalar(VolField<'m, f64>),
    FloatScalar(VolField<'m, f32>),
    Vector(VolField<'m, [f64; 3]>),
}

fn resolve<'m, T: FieldValue>(mesh: &'m PolyMesh, record: &FieldRecord<T>) -> anyhow::Result<VolField<'m, T>> {
    VolField::read(mesh, record, &PatchFieldFactory::standard())
        .with_context(|| format!("resolving boundary conditions of {}", record.name))
}

fn remap_and_write<T: FieldValue>(
    field: VolField<'_, T>,
    mesh: &PolyMesh,
    map: &IndexMap,
    out: &CaseDir,
) -> anyhow::Result<()> {
    let name = field.name().to_string();
    let field = field
        .topo_change(mesh, map)
        .with_context(|| format!("mapping field {name}"))?;
    out.write_field(&field.record()?)
        .with_context(|| format!("writing field {name}"))?;
    Ok(())
}

fn init_logging(level: Option<&str>) -> anyhow::Result<()> {
    let mut builder = env_logger::Builder::from_default_env();
    if let Some(level) = level {
        let filter: LevelFilter = level
            .parse()
            .with_context(|| format!("invalid log level {level}"))?;
        builder.filter_level(filter);
    } else if std::env::var_os("RUST_LOG").is_none() {
        builder.filter_level(LevelFilter::Info);
    }
    builder.format_target(false).try_init()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref())?;

    let case = CaseDir::new(&cli.case);
    let mut mesh = case
        .read_mesh()
        .with_context(|| format!("reading mesh from {}", case.root().display()))?;
    let candidates = case
        .read_face_set(&cli.face_set)
        .with_context(|| format!("reading face set {}", cli.face_set))?;
    log::info!(
        "Read {} faces from faceSet {}",
        candidates.len(),
        candidates.name
    );

    let mut remover = FaceRemover::new(MaxRegionCells(cli.max_region_cells.unwrap_or(usize::MAX)));
    let removes = remover.compatible_removes(&mesh, &candidates.to_vec());
    if removes.faces.len() != candidates.len() {
        log::warn!(
            "Removing {} of {} candidate faces to keep the merged cells valid",
            removes.faces.len(),
            candidates.len()
        );
    }
    let compatible = FaceSet::new("compatibleRemoves", removes.faces.iter().copied());

    let out = if cli.overwrite {
        case.clone()
    } else {
        case.next_time().context("choosing output directory")?
    };

    if removes.is_empty() {
        log::info!("No faces to remove; mesh left unchanged");
        out.write_face_set(&compatible)
            .context("writing compatibleRemoves")?;
        return Ok(());
    }

    let old_mesh = mesh.clone();
    let mut fields = Vec::new();
    if !cli.no_fields {
        for name in case.field_names().context("listing fields")? {
            let stored = case
                .read_stored_field(&name)
                .with_context(|| format!("reading field {name}"))?;
            fields.push(match stored {
                StoredField::Scalar(r) => Field::Scalar(resolve(&old_mesh, &r)?),
                StoredField::FloatScalar(r) => Field::FloatScalar(resolve(&old_mesh, &r)?),
                StoredField::Vector(r) => Field::Vector(resolve(&old_mesh, &r)?),
            });
        }
        log::info!("Read {} fields", fields.len());
    }

    let mut change = TopoChange::new(&mesh);
    remover
        .set_refinement(&mesh, &removes, &mut change)
        .context("recording face removal")?;
    let map = change.commit(&mut mesh).context("committing topology change")?;
    if let Some(points) = map.pre_motion_points() {
        mesh.move_points(points.to_vec())
            .context("restoring point positions")?;
    }
    remover.topo_change(&map)?;
    log::info!(
        "Merged into {} cells; mesh now has {} cells and {} faces",
        remover.merged_cells().len(),
        mesh.n_cells(),
        mesh.n_faces()
    );

    mesh.validate_invariants()
        .context("mesh is invalid after removing faces")?;

    out.write_mesh(&mesh).context("writing mesh")?;
    out.write_face_set(&compatible)
        .context("writing compatibleRemoves")?;
    for field in fields {
        match field {
            Field::Scalar(f) => remap_and_write(f, &mesh, &map, &out)?,
            Field::FloatScalar(f) => remap_and_write(f, &mesh, &map, &out)?,
            Field::Vector(f) => remap_and_write(f, &mesh, &map, &out)?,
        }
    }
    log::info!("Wrote mesh to {}", out.root().display());
    Ok(())
}
