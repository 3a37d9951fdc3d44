use std::{env, io, path::PathBuf};

use anyhow::Context as _;
use indicatif::ProgressBar;
use minibvh::{
    BuildConfig, BvhError, HitRecord, Quality, Scene, TraversalMode, TraversalStack,
    executor::{Executor as _, ParallelExecutor, WorkerCount},
    geometry::BoxTest,
    ray_list::load_ray_list,
    scene::mesh::Mesh,
};

const DEFAULT_MESH: &str = "dataset/scenes/bunny.obj";
const DEFAULT_RAYS: &str = "dataset/rays";

fn main() -> anyhow::Result<()> {
    let mut args = env::args_os().skip(1);
    let mesh_path = PathBuf::from(args.next().unwrap_or_else(|| DEFAULT_MESH.into()));
    let rays_path = PathBuf::from(args.next().unwrap_or_else(|| DEFAULT_RAYS.into()));

    let mesh = Mesh::with_obj(&mesh_path)
        .with_context(|| format!("Failed to load mesh {}", mesh_path.display()))?;
    let triangles = mesh.triangles();
    println!(
        "Triangles: {} ({} vertices)",
        triangles.len(),
        mesh.vertices.len()
    );

    let executor = ParallelExecutor::new(WorkerCount::Auto)?;
    // Whole scene under the threshold, always built from mini-trees
    let config = BuildConfig::builder()
        .quality(Quality::High)
        .parallel_threshold(triangles.len())
        .build();
    let (scene, statistics) = Scene::build(&triangles, &config, &executor);
    println!("{statistics}");

    let ray_list = match load_ray_list(&rays_path) {
        Ok(ray_list) => ray_list,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            eprintln!("Ray list {} not found, nothing to trace", rays_path.display());
            return Ok(());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read rays {}", rays_path.display()));
        }
    };
    if ray_list.skipped_lines > 0 {
        eprintln!("Skipped {} malformed ray lines", ray_list.skipped_lines);
    }

    let rays = &ray_list.rays;
    let bar = ProgressBar::new(rays.len() as u64);
    let mut results: Vec<Result<Option<HitRecord>, BvhError>> = vec![Ok(None); rays.len()];
    executor.for_each_mut(&mut results, |offset, chunk| {
        let mut stack: TraversalStack = TraversalStack::new();
        for (i, result) in chunk.iter_mut().enumerate() {
            *result = scene.intersect(
                &rays[offset + i],
                TraversalMode::ClosestHit,
                BoxTest::Fast,
                &mut stack,
            );
        }
        bar.inc(chunk.len() as u64);
    });
    bar.finish_and_clear();

    let mut hits = 0usize;
    let mut distance_sum = 0.0f64;
    for result in results {
        if let Some(hit) = result? {
            hits += 1;
            distance_sum += hit.t as f64;
        }
    }
    let avg_distance = if hits > 0 {
        distance_sum / hits as f64
    } else {
        0.0
    };

    println!(
        "Rays traced: {}  hits: {}  avg distance: {:.6}",
        rays.len(),
        hits,
        avg_distance
    );

    Ok(())
}
