use rem3_lib::catalog::{CatalogOptions, CatalogStore, RecordSet};
use rem3_lib::transcribe::{estimate_batch_cost, PageRenderer, RenderedImageDir};
use rem3_lib::{format_cost, init_tracing, Config};
use std::process::ExitCode;
use tracing::{error, info, warn};

/// Rebuild the catalog from the local mirror and report what a
/// transcription run over the rendered pages would cost.
#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", e.remedy());
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = config.ensure_directories() {
        error!(base_dir = %config.base_dir.display(), "Failed to create data directories: {}", e);
        return ExitCode::FAILURE;
    }

    let records = match RecordSet::load_dir(&config.raw_dir()) {
        Ok(records) => records,
        Err(e) => {
            error!("Failed to load document metadata: {}", e);
            return ExitCode::FAILURE;
        }
    };
    for warning in records.warnings() {
        warn!("{}", warning);
    }

    let tree = records.build(CatalogOptions {
        include_deleted: config.include_trash,
    });
    for warning in &tree.warnings {
        warn!("{}", warning);
    }
    if let Err(e) = CatalogStore::new(config.catalog_file()).save(&tree) {
        error!("Failed to save catalog: {}", e);
        return ExitCode::FAILURE;
    }

    let stats = tree.stats();
    info!(
        documents = stats.documents,
        collections = stats.collections,
        notebooks = stats.notebooks,
        pdfs = stats.pdfs,
        epubs = stats.epubs,
        trashed = stats.trashed,
        total_pages = stats.total_pages,
        "Catalog rebuilt"
    );

    let renderer = RenderedImageDir::new(config.images_dir());
    let mut rendered_pages = 0;
    for document in tree.documents(None) {
        match renderer.pages(&document.id).await {
            Ok(pages) => rendered_pages += pages.len(),
            Err(e) => warn!(document = %document.id, "Skipping rendered pages: {}", e),
        }
    }

    let mode = config.transcription_mode();
    let estimate = estimate_batch_cost(rendered_pages, &mode);
    info!(
        pages = rendered_pages,
        cracked = mode.is_cracked(),
        "Estimated transcription cost: {}",
        format_cost(estimate.total)
    );

    ExitCode::SUCCESS
}
