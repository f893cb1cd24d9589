use cgmath::{Deg, Quaternion, Rotation3, Vector3};
use clap::Parser;
use log::{error, info};
use web_time::Instant;

use fractal_canopy::{
    Affine3x4, DrawContext, DrawRequest, FractalConfig, FractalTree, InstanceSink, PackedMatrix,
    RootTransform, DEFAULT_DEPTH,
};

const FRAME_DT: f32 = 1.0 / 60.0;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Headless fractal tree frame loop")]
struct Args {
    /// Number of levels, root included
    #[arg(long, default_value_t = DEFAULT_DEPTH + 2)]
    depth: usize,

    /// Frames to simulate at 60 Hz
    #[arg(long, default_value_t = 120)]
    frames: usize,

    /// Seed for reproducible motion; random when omitted
    #[arg(long)]
    seed: Option<u64>,
}

/// Stands in for the GPU upload: tallies what each frame would send.
#[derive(Default)]
struct UploadStats {
    draws: usize,
    instances: usize,
    bytes: usize,
}

impl<M: PackedMatrix> InstanceSink<M> for UploadStats {
    fn draw_instances(&mut self, request: &DrawRequest<'_, M>) {
        self.draws += 1;
        self.instances += request.instance_count();
        self.bytes += request.matrix_bytes().len();
    }
}

fn run(depth: usize, frames: usize, seed: Option<u64>) -> fractal_canopy::Result<()> {
    let config = FractalConfig::default().with_depth(depth);
    let mut fractal = match seed {
        Some(seed) => FractalTree::<Affine3x4>::with_seed(config, seed)?,
        None => FractalTree::<Affine3x4>::new(config)?,
    };
    info!(
        "fractal depth {} with {} parts",
        depth,
        fractal.tree()?.part_count()
    );

    let mut context = DrawContext::new();
    let mut stats = UploadStats::default();
    let start_time = Instant::now();
    let mut update_time = 0.0;

    for frame in 0..frames {
        let time_elapsed = frame as f32 * FRAME_DT;
        let root = RootTransform {
            position: Vector3::new(0.0, 0.0, 0.0),
            rotation: Quaternion::from_angle_y(Deg(10.0 * time_elapsed)),
            scale: 1.0,
        };
        let frame_start = Instant::now();
        fractal.update(&root, FRAME_DT)?;
        update_time += frame_start.elapsed().as_secs_f64();
        fractal.submit(&mut context, &mut stats)?;
    }

    let total = start_time.elapsed().as_secs_f64();
    let frames_f = frames.max(1) as f64;
    info!(
        "{} frames in {:.3}s, update {:.3}ms/frame, {} draws, {} instances, {} bytes/frame",
        frames,
        total,
        1000.0 * update_time / frames_f,
        stats.draws,
        stats.instances,
        stats.bytes / frames.max(1)
    );
    Ok(())
}

pub fn main() {
    let args = Args::parse();
    env_logger::init();

    if let Err(err) = run(args.depth, args.frames, args.seed) {
        error!("fractal demo failed: {err}");
        std::process::exit(1);
    }
}
