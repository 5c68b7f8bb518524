use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use app_settings::{AppSettings, EngineSettings};
use areas::{load_area_map, AreaIndex};
use catalog::{CatalogService, ImageRecord, IngestOptions};
use core_types::Fingerprint;
use serde::Serialize;
use tracing::warn;

use crate::cli::{Cli, Commands, IngestArgs};

pub fn execute(cli: Cli) -> Result<()> {
    let mut remembered = AppSettings::load().unwrap_or_else(|err| {
        warn!(error = %err, "could not read remembered session, starting fresh");
        AppSettings::default()
    });

    let workdir = cli
        .workdir
        .clone()
        .or_else(|| remembered.last_workdir.clone())
        .context("no working directory given and none remembered; pass --workdir")?;
    let map_path = cli
        .map
        .clone()
        .or_else(|| remembered.last_map.clone().filter(|path| path.exists()));

    let service = open_session(&workdir, map_path.as_deref())?;

    remembered.remember_session(workdir.clone(), map_path);
    if let Err(err) = remembered.save() {
        warn!(error = %err, "could not remember session");
    }

    let out = Output::new(cli.json);
    run(&service, cli.command, &out)?;
    service.close().context("failed to close session")?;
    Ok(())
}

fn open_session(workdir: &Path, map: Option<&Path>) -> Result<CatalogService> {
    let index = match map {
        Some(path) => {
            let map = load_area_map(path)
                .with_context(|| format!("failed to load area map {}", path.display()))?;
            for skipped in &map.skipped {
                warn!(%skipped, "map feature ignored");
            }
            Some(AreaIndex::from_map(map))
        }
        None => None,
    };
    let settings = EngineSettings::load_from_dir(workdir)
        .with_context(|| format!("invalid settings in {}", workdir.display()))?;
    CatalogService::open(workdir, settings, index)
        .with_context(|| format!("failed to open working directory {}", workdir.display()))
}

fn run(service: &CatalogService, command: Commands, out: &Output) -> Result<()> {
    match command {
        Commands::Ingest(args) => ingest(service, args, out),
        Commands::Areas => {
            let rollups = service.area_rollups()?;
            let store = service.snapshot()?;
            out.emit(&rollups, || {
                for rollup in &rollups {
                    let code = store
                        .areas
                        .get(&rollup.area_id)
                        .map_or(rollup.area_id.as_str(), |area| area.display_code());
                    println!(
                        "{:<16} {:<12} {:>4} images  ({} not started, {} partial, {} completed)",
                        rollup.area_id,
                        code,
                        rollup.counts.total(),
                        rollup.counts.not_started,
                        rollup.counts.partial,
                        rollup.counts.completed,
                    );
                    println!("{:<16} status: {}", "", rollup.status.label());
                }
            });
            Ok(())
        }
        Commands::Area { id } => {
            let report = service.area_report(&core_types::AreaId::new(id))?;
            out.emit(&report, || {
                println!(
                    "{} ({}) - {}",
                    report.area.id,
                    report.area.display_code(),
                    report.status.label()
                );
                for member in &report.members {
                    print_record_line(member);
                }
                for line in &report.comment_digest {
                    println!("  * {line}");
                }
            });
            Ok(())
        }
        Commands::List { unresolved } => {
            let records = if unresolved {
                service.unresolved_records()?
            } else {
                service.list_records()?
            };
            out.emit(&records, || records.iter().for_each(print_record_line));
            Ok(())
        }
        Commands::Show { fingerprint } => {
            let fp = resolve(service, &fingerprint)?;
            let report = service.image_report(&fp)?;
            out.emit(&report, || {
                println!("fingerprint  {}", report.record.fingerprint);
                for path in &report.record.source_paths {
                    println!("path         {}", path.display());
                }
                if let Some(derived) = &report.record.derived {
                    println!(
                        "derived      {} ({} bytes, {} attempts)",
                        derived.path.display(),
                        derived.size_bytes,
                        derived.attempts
                    );
                }
                match report.record.coordinates {
                    Some(point) => println!("position     {point}"),
                    None => println!("position     -"),
                }
                if let Some(captured) = report.record.captured_at {
                    println!("captured     {}", captured.to_rfc3339());
                }
                println!("area         {} ({})", report.sigla, report.record.area_id().map_or("-", |id| id.as_str()));
                if let Some(near) = &report.near {
                    println!("nearest      {} at {:.0} m", near.area_id, near.distance_m);
                }
                println!("status       {}", report.status.label());
                println!("order        {}", report.record.order_index);
                println!("file name    {}", report.suggested_filename);
                if !report.comment.is_empty() {
                    println!("comment      {}", report.comment);
                }
            });
            Ok(())
        }
        Commands::Status { fingerprint, status } => {
            let fp = resolve(service, &fingerprint)?;
            service.set_status(&fp, status)?;
            out.done(format!("{} is now {status}", fp.short()));
            Ok(())
        }
        Commands::Comment { fingerprint, text } => {
            let fp = resolve(service, &fingerprint)?;
            service.set_comment(&fp, text)?;
            out.done(format!("comment of {} updated", fp.short()));
            Ok(())
        }
        Commands::Order { fingerprint, index } => {
            let fp = resolve(service, &fingerprint)?;
            service.set_order(&fp, index)?;
            out.done(format!("{} pinned at {index}", fp.short()));
            Ok(())
        }
        Commands::Exclude { fingerprint, undo } => {
            let fp = resolve(service, &fingerprint)?;
            service.set_excluded(&fp, !undo)?;
            let verb = if undo { "included" } else { "excluded" };
            out.done(format!("{} {verb}", fp.short()));
            Ok(())
        }
        Commands::Remove { fingerprint } => {
            let fp = resolve(service, &fingerprint)?;
            service.remove_image(&fp)?;
            out.done(format!("{} removed", fp.short()));
            Ok(())
        }
        Commands::Reorder => {
            let changed = service.reorder_by_area()?;
            out.done(format!("{changed} images renumbered"));
            Ok(())
        }
        Commands::Prune => {
            let report = service.prune_missing_paths()?;
            out.emit(&report, || {
                for path in &report.paths_removed {
                    println!("dropped {}", path.display());
                }
                for fp in &report.orphaned {
                    println!("{} has no source file left", fp.short());
                }
            });
            Ok(())
        }
        Commands::ReplaceOriginals { fingerprint } => {
            let fp = resolve(service, &fingerprint)?;
            let replaced = service.replace_with_derived(&fp)?;
            out.done(format!("{replaced} original files replaced for {}", fp.short()));
            Ok(())
        }
        Commands::Thumbnail { fingerprint, out: target } => {
            let fp = resolve(service, &fingerprint)?;
            let jpeg = service.thumbnail(&fp)?;
            fs::write(&target, jpeg)
                .with_context(|| format!("failed to write {}", target.display()))?;
            out.done(format!("thumbnail written to {}", target.display()));
            Ok(())
        }
    }
}

fn ingest(service: &CatalogService, args: IngestArgs, out: &Output) -> Result<()> {
    let dir: PathBuf = args.dir.unwrap_or_else(|| service.workdir().to_path_buf());
    let options = IngestOptions {
        workers: args.workers,
        ..IngestOptions::default()
    };
    let report = service
        .ingest_directory(&dir, options)
        .with_context(|| format!("failed to ingest {}", dir.display()))?;

    out.emit(&report, || {
        println!(
            "{} added, {} updated, {} unchanged, {} failed",
            report.added.len(),
            report.updated.len(),
            report.unchanged.len(),
            report.failed.len()
        );
        for (path, warning) in &report.warnings {
            println!("warning: {}: {warning}", path.display());
        }
        for (path, error) in &report.failed {
            println!("failed:  {}: {error}", path.display());
        }
    });
    Ok(())
}

/// Full fingerprint, or a prefix matching exactly one record.
fn resolve(service: &CatalogService, raw: &str) -> Result<Fingerprint> {
    if let Ok(fp) = raw.parse::<Fingerprint>() {
        return Ok(fp);
    }
    let needle = raw.trim().to_ascii_lowercase();
    if needle.is_empty() {
        bail!("empty fingerprint");
    }
    let store = service.snapshot()?;
    let mut matches = store
        .records
        .keys()
        .filter(|fp| fp.as_str().starts_with(&needle));
    match (matches.next(), matches.next()) {
        (Some(fp), None) => Ok(fp.clone()),
        (None, _) => bail!("no image matches {raw}"),
        (Some(_), Some(_)) => bail!("{raw} matches more than one image; use a longer prefix"),
    }
}

fn print_record_line(record: &ImageRecord) {
    let area = record.area_id().map_or("-", |id| id.as_str());
    let excluded = if record.is_excluded() { " (excluded)" } else { "" };
    println!(
        "{:>4}  {}  {:<16} {:<14}{}",
        record.order_index,
        record.fingerprint.short(),
        area,
        record.status.label(),
        excluded
    );
}

struct Output {
    json: bool,
}

impl Output {
    fn new(json: bool) -> Self {
        Self { json }
    }

    fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce()) {
        if self.json {
            match serde_json::to_string_pretty(value) {
                Ok(text) => println!("{text}"),
                Err(err) => warn!(error = %err, "failed to render JSON output"),
            }
        } else {
            human();
        }
    }

    fn done(&self, message: impl Display) {
        if self.json {
            let output = serde_json::json!({
                "status": "success",
                "message": message.to_string(),
            });
            println!("{output}");
        } else {
            println!("{message}");
        }
    }
}
