mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;

use beatreel::config::{self, Config};
use beatreel::presets::{Preset, PresetStore};
use beatreel::{render_music_responsive_video, CancelToken, RenderContext, RenderProgress, RenderRequest};
use cli::Cli;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    // Load config: explicit --config path, or auto-detect beatreel.toml / global config
    let config_path = cli.config.clone().or_else(config::discover_config_path);
    let mut cfg = Config::default();
    if let Some(ref path) = config_path {
        if let Some(loaded) = config::load_config(path) {
            log::info!("Loaded config from {}", path.display());
            cfg = loaded;
            // Merge: config values apply only when CLI is at its default
            if cli.width == 1080 { cli.width = cfg.output.width; }
            if cli.height == 1920 { cli.height = cfg.output.height; }
            if cli.fps == 30 { cli.fps = cfg.output.fps; }
            if cli.crf == 20 { cli.crf = cfg.output.crf; }
            if cli.codec == "libx264" { cli.codec = cfg.output.codec.clone(); }
            if cli.pix_fmt == "yuv420p" { cli.pix_fmt = cfg.output.pix_fmt.clone(); }
            if cli.presets_dir.is_none() { cli.presets_dir = cfg.presets.dir.clone(); }
        } else {
            log::warn!("Failed to load config from {}", path.display());
        }
    }
    cfg.output.crf = cli.crf;
    cfg.output.codec = cli.codec.clone();
    cfg.output.pix_fmt = cli.pix_fmt.clone();
    if !cli.no_smart_transitions {
        cli.no_smart_transitions = !cfg.render.smart_transitions;
    }

    let presets_dir = cli.presets_dir.clone().or_else(config::default_presets_dir);
    let store = match presets_dir {
        Some(ref dir) => PresetStore::open(dir)
            .with_context(|| format!("Failed to open preset store {}", dir.display()))?,
        None => PresetStore::in_memory(),
    };
    let store = Arc::new(store);

    if run_preset_command(&cli, &store)? {
        return Ok(());
    }

    let audio = cli.audio.clone().context("Input audio file is required")?;
    let request = RenderRequest {
        images: cli.images.clone(),
        audio,
        output: cli.output.clone(),
        fps: cli.fps,
        duration: cli.duration,
        width: cli.width,
        height: cli.height,
        effect_intensity: cli.effect_intensity,
        anticipation_time: cli.anticipation,
        smart_transitions: !cli.no_smart_transitions,
        preset: cli.preset.clone(),
        custom_preset: cli.custom_preset.clone(),
        seed: cli.seed.unwrap_or(cfg.render.seed),
    };

    log::info!("beatreel - music-synced slideshow renderer");
    log::info!("Audio: {}", request.audio.display());
    log::info!("Output: {}", request.output.display());

    let ctx = RenderContext::new(cfg, store);

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} frames ({eta} remaining)")?
            .progress_chars("=>-"),
    );
    let mut on_progress = |p: RenderProgress| {
        pb.set_length(p.total);
        pb.set_position(p.frame);
    };

    let output = render_music_responsive_video(&ctx, &request, &CancelToken::new(), &mut on_progress)?;
    pb.finish_with_message("Rendering complete");

    log::info!("Done! Output: {}", output.display());
    Ok(())
}

/// Handle the preset management flags. Returns true when one ran.
fn run_preset_command(cli: &Cli, store: &PresetStore) -> Result<bool> {
    if cli.list_presets {
        println!("Available presets:");
        for (id, preset) in store.list() {
            println!("  {:<20} {}", id, preset.description);
        }
        return Ok(true);
    }

    if let Some(ref path) = cli.import_preset {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read preset: {}", path.display()))?;
        let preset = Preset::from_json(&json)
            .with_context(|| format!("Failed to parse preset: {}", path.display()))?;
        let id = store.create(preset)?;
        println!("Imported preset as '{}'", id);
        return Ok(true);
    }

    if let Some(ref id) = cli.export_preset {
        let preset = store
            .get(id)
            .with_context(|| format!("Preset '{}' not found", id))?;
        println!("{}", preset.to_json()?);
        return Ok(true);
    }

    if let Some([id, path]) = cli.update_preset.as_deref() {
        let json = std::fs::read_to_string(path).with_context(|| format!("Failed to read preset: {}", path))?;
        let preset = Preset::from_json(&json).with_context(|| format!("Failed to parse preset: {}", path))?;
        store.update(id, preset)?;
        println!("Updated preset '{}'", id);
        return Ok(true);
    }

    if let Some(ref id) = cli.delete_preset {
        store.delete(id)?;
        println!("Deleted preset '{}'", id);
        return Ok(true);
    }

    Ok(false)
}
