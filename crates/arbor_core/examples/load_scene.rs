//! Example: Load a scene file and inspect its logical and render trees.
//!
//! Run with: cargo run --example load_scene -- site.json [options.json]

use std::cell::RefCell;
use std::env;
use std::path::Path;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use arbor_core::{
    JsonSceneParser, Loader, LoaderEvent, LoaderOptions, ModelParser, ObjParser, WorldTree,
};

fn parser_for(path: &str) -> Result<Box<dyn ModelParser>> {
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("json") => Ok(Box::new(JsonSceneParser::new())),
        Some("obj") => Ok(Box::new(ObjParser::new())),
        _ => bail!("Unsupported file type: {}", path),
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        println!("Usage: load_scene <scene.json|model.obj> [options.json]");
        println!("\nExamples:");
        println!("  cargo run --example load_scene -- assets/site.json");
        println!("  cargo run --example load_scene -- assets/cube.obj options.json");
        return Ok(());
    }

    let path = &args[1];
    let options = match args.get(2) {
        Some(options_path) => {
            let json = std::fs::read_to_string(options_path)
                .with_context(|| format!("Could not read {}", options_path))?;
            LoaderOptions::from_json_str(&json)?
        }
        None => LoaderOptions::default(),
    };

    println!("Loading scene: {}", path);

    let tree = Rc::new(RefCell::new(WorldTree::new()));
    let loader = Loader::with_options(tree.clone(), path.as_str(), None, parser_for(path)?, &options)?;
    loader.on_event(|event| match event {
        LoaderEvent::LoadProgress { progress, .. } => println!("  {:>5.1}%", progress * 100.0),
        LoaderEvent::LoadComplete { id, success } => println!("  {} complete: {}", id, success),
    });

    pollster::block_on(loader.load())?;
    loader.dispose();

    let tree = tree.borrow();

    println!("\n=== Logical tree: {} nodes ===", tree.node_count(path));
    tree.walk(path, |_, node, depth| {
        let source = node.raw.borrow();
        println!(
            "{}[{}] {} {}",
            "  ".repeat(depth),
            source.type_tag,
            node.id,
            source.name.as_deref().unwrap_or("")
        );
    })?;

    let Some(render_tree) = tree.render_tree(path) else {
        bail!("No render tree for {}", path);
    };
    let stats = render_tree.stats();

    println!("\n=== Render tree: {} payloads ===", render_tree.len());
    println!("Meshes: {}", stats.meshes);
    println!("Instances: {}", stats.instances);
    println!("Vertices: {}", stats.vertices);
    println!("Triangles: {}", stats.triangles);

    println!("\n--- Payloads ---");
    for entry in render_tree.iter() {
        match entry.payload.transform() {
            Some(transform) => {
                let pos = transform.transform_point3(arbor_math::Vec3::ZERO);
                println!(
                    "  [{:?}] {} at ({:.2}, {:.2}, {:.2})",
                    entry.semantic_type, entry.id, pos.x, pos.y, pos.z
                );
            }
            None => println!(
                "  [{:?}] {} - {} vertices, {} triangles",
                entry.semantic_type,
                entry.id,
                entry.payload.vertex_count(),
                entry.payload.triangle_count()
            ),
        }
    }

    Ok(())
}
