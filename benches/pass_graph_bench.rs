//! Pass Graph Benchmarks
//!
//! - `resolve_order`: stable topological sort over chains and fan-ins
//! - `render_frame`: one headless frame with the full plugin stack

use std::any::Any;
use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use glam::{Mat4, Vec3};

use lustre::graph::{PassGraph, PassRelations, PassState, PostPass, RenderContext, TargetId};
use lustre::passes::{
    BloomPlugin, ContactShadowsPlugin, DepthOfFieldPlugin, GBufferPlugin, OutlinePlugin,
    SsgiPlugin, SsrPlugin, TaaPlugin, VelocityPlugin,
};
use lustre::{CameraView, HeadlessBackend, Material, Pipeline, PipelineSettings, Result, Scene};

struct NullPass {
    name: String,
    relations: PassRelations,
    state: PassState,
}

impl PostPass for NullPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn relations(&self) -> &PassRelations {
        &self.relations
    }

    fn state(&self) -> &PassState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut PassState {
        &mut self.state
    }

    fn render(
        &mut self,
        _ctx: &mut RenderContext<'_>,
        _write: TargetId,
        _read: TargetId,
        _delta: f32,
        _mask_active: bool,
    ) -> Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// `n` passes registered in reverse, each required to run after its
/// predecessor, plus every fourth pass placed before the last one.
fn chain(n: usize) -> PassGraph {
    let mut graph = PassGraph::new();
    let last = format!("p{}", n - 1);
    for i in (0..n).rev() {
        let mut relations = PassRelations::new();
        if i > 0 {
            relations.after.push(format!("p{}", i - 1));
        }
        if i % 4 == 0 && i + 1 < n {
            relations.before.push(last.clone());
        }
        let pass = NullPass {
            name: format!("p{i}"),
            relations,
            state: PassState::default(),
        };
        if graph.register(Box::new(pass)).is_err() {
            panic!("chain graph must be acyclic");
        }
    }
    graph
}

fn bench_resolve_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_order");
    for n in [8, 32, 128] {
        let graph = chain(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &graph, |b, graph| {
            b.iter(|| black_box(graph.resolve_order().map(|order| order.len())));
        });
    }
    group.finish();
}

fn bench_render_frame(c: &mut Criterion) {
    let mut pipeline = Pipeline::new(
        Box::new(HeadlessBackend::new()),
        PipelineSettings::default().with_size(1280, 720),
    )
    .expect("pipeline");
    pipeline.add_plugin(GBufferPlugin::new()).expect("gbuffer");
    pipeline.add_plugin(VelocityPlugin::new()).expect("velocity");
    pipeline.add_plugin(TaaPlugin::new()).expect("taa");
    pipeline.add_plugin(BloomPlugin::new()).expect("bloom");
    pipeline.add_plugin(DepthOfFieldPlugin::new()).expect("dof");
    pipeline.add_plugin(SsrPlugin::new()).expect("ssr");
    pipeline.add_plugin(SsgiPlugin::new()).expect("ssgi");
    pipeline.add_plugin(OutlinePlugin::new()).expect("outline");
    pipeline.add_plugin(ContactShadowsPlugin::new()).expect("contact shadows");

    let mut scene = Scene::new(CameraView::perspective(
        1,
        Vec3::new(0.0, 2.0, 6.0),
        Vec3::ZERO,
        0.8,
        16.0 / 9.0,
        0.1,
        100.0,
    ));
    let material = scene.add_material(Material::physical());
    for i in 0..64 {
        let offset = Vec3::new((i % 8) as f32, 0.0, (i / 8) as f32);
        scene.add_object(&format!("cube{i}"), Mat4::from_translation(offset), material);
    }

    c.bench_function("render_frame/full_stack", |b| {
        b.iter(|| {
            if let Some(backend) = pipeline.core_mut().backend_as_mut::<HeadlessBackend>() {
                backend.clear_commands();
            }
            // Keep accumulation restarting so every pass does work.
            pipeline.set_dirty();
            black_box(pipeline.render_frame(&scene, 0.016).map(|r| r.executed.len()))
        });
    });
}

criterion_group!(benches, bench_resolve_order, bench_render_frame);
criterion_main!(benches);
