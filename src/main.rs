// Tabular Exchange - CLI
// Import, preview and export delimited files; manage saved templates.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use tabular_exchange::import::DEFAULT_PREVIEW_ROWS;
use tabular_exchange::{
    logging, preview_rows, preview_with_template, Audience, EntityKind, ExchangeConfig,
    ExportCriteria, ExportFormat, ExportPipeline, ExportQuery, ImportObserver, ImportOutcome,
    ImportPipeline, ImportRun, ImportShape, RecordStore, ShapeRegistry, SqliteRecordStore,
    SqliteTemplateStore, Template, TemplateFamily, TemplateRepository,
};

#[derive(Parser)]
#[command(
    name = "tabular-exchange",
    version,
    about = "Import and export student and user records as delimited files"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// SQLite database (overrides config and EXCHANGE_DATABASE)
    #[arg(long, value_name = "PATH", global = true)]
    database: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Import a file with one of the built-in shapes
    Import {
        file: PathBuf,
        /// users | students (detected from the file name when omitted)
        #[arg(long)]
        shape: Option<String>,
    },

    /// Write the blank starter file of a shape
    Blank {
        shape: String,
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
    },

    /// Show the first rows of a file, optionally against an import template
    Preview {
        file: PathBuf,
        #[arg(long, value_name = "TEMPLATE_ID")]
        template: Option<Uuid>,
        #[arg(long, default_value_t = DEFAULT_PREVIEW_ROWS)]
        limit: usize,
    },

    /// Export records through a saved export template
    Export(ExportArgs),

    /// Manage saved templates
    Templates {
        #[command(subcommand)]
        action: TemplateAction,
    },

    /// List the attributes of a record kind
    Schema { kind: String },

    /// Show the import audit trail
    Runs,
}

#[derive(clap::Args)]
struct ExportArgs {
    template: Uuid,

    /// csv | json (csv when omitted; with --preview, prints the serialized rows)
    #[arg(long)]
    format: Option<String>,

    /// all | alumnos | administrador | clinica | orientador | examinador | familia
    #[arg(long, default_value = "all")]
    audience: String,

    #[arg(long)]
    center: Option<String>,
    #[arg(long)]
    stage: Option<String>,
    #[arg(long)]
    course: Option<String>,
    #[arg(long)]
    group: Option<String>,

    /// Columns to include (repeatable; all when omitted)
    #[arg(long = "field", value_name = "DISPLAY_NAME")]
    fields: Vec<String>,

    /// Print the first rows instead of writing a file
    #[arg(long)]
    preview: bool,

    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,
}

#[derive(Subcommand)]
enum TemplateAction {
    List {
        /// import | export
        #[arg(long)]
        family: Option<String>,
        #[arg(long)]
        search: Option<String>,
    },
    Show {
        id: Uuid,
    },
    /// Save a template from a JSON file (insert without id, replace with id)
    Save {
        file: PathBuf,
    },
    Remove {
        id: Uuid,
    },
    Duplicate {
        id: Uuid,
    },
    /// Write the header-only file of an import template
    Header {
        id: Uuid,
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ExchangeConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(database) = &cli.database {
        config = config.with_database_path(database);
    }
    logging::init(&config.logging)?;

    match cli.command {
        Command::Import { file, shape } => run_import(&config, &file, shape.as_deref()),
        Command::Blank { shape, out } => run_blank(&shape, out),
        Command::Preview {
            file,
            template,
            limit,
        } => run_preview(&config, &file, template, limit),
        Command::Export(args) => run_export(&config, args),
        Command::Templates { action } => run_templates(&config, action),
        Command::Schema { kind } => run_schema(&config, &kind),
        Command::Runs => run_runs(&config),
    }
}

// ============================================================================
// IMPORT
// ============================================================================

/// Prints a progress line every 10%
struct ProgressPrinter {
    last: u8,
}

impl ImportObserver for ProgressPrinter {
    fn on_progress(&mut self, percent: u8) {
        if percent / 10 > self.last / 10 || percent == 100 {
            println!("   … {}%", percent);
        }
        self.last = percent;
    }
}

fn run_import(config: &ExchangeConfig, file: &Path, shape: Option<&str>) -> Result<()> {
    println!("📥 Import - {}", file.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let shape = match shape {
        Some(shape) => shape.parse::<ImportShape>()?,
        None => ImportShape::detect(&file_name).ok_or_else(|| {
            anyhow!("cannot detect the shape from '{}'; pass --shape users|students", file_name)
        })?,
    };
    println!("✓ Shape: {}", shape);

    let contents = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let store = open_records(config)?;
    let registry = ShapeRegistry::builtin();

    let mut printer = ProgressPrinter { last: 0 };
    let outcome = ImportPipeline::new(&store, &registry).run(&contents, shape, &mut printer)?;

    store.record_import_run(&ImportRun::new(
        shape,
        Some(file_name),
        &contents,
        outcome.clone(),
    ))?;

    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &ImportOutcome) {
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✓ Total rows:  {}", outcome.total);
    println!("✓ Imported:    {}", outcome.success);
    if outcome.errors > 0 {
        println!("❌ Rejected:    {}", outcome.errors);
        for detail in &outcome.error_details {
            println!("   Fila {}: {}", detail.row, detail.error);
        }
    }
}

fn run_blank(shape: &str, out: Option<PathBuf>) -> Result<()> {
    let shape: ImportShape = shape.parse()?;
    let registry = ShapeRegistry::builtin();
    let content = registry.require(shape)?.blank_file()?;

    let path = out.unwrap_or_else(|| PathBuf::from(shape.blank_file_name()));
    write_file(&path, &content)?;
    println!("✓ Blank {} file written to {}", shape, path.display());
    Ok(())
}

fn run_preview(config: &ExchangeConfig, file: &Path, template: Option<Uuid>, limit: usize) -> Result<()> {
    let bytes = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let text = std::str::from_utf8(&bytes).context("File is not valid UTF-8")?;

    match template {
        None => {
            let parsed = preview_rows(text, limit);
            println!("{}", parsed.headers.join(" | "));
            for row in &parsed.rows {
                println!("{}", row.values().join(" | "));
            }
        }
        Some(id) => {
            let template = open_templates(config)?.get(id)?;
            let preview = preview_with_template(text, &template, limit)?;

            println!("{}", preview.columns.join(" | "));
            if !preview.missing_columns.is_empty() {
                println!("⚠️  Missing required columns: {}", preview.missing_columns.join(", "));
            }
            if !preview.unexpected_columns.is_empty() {
                println!("⚠️  Columns not in template: {}", preview.unexpected_columns.join(", "));
            }
            for row in &preview.rows {
                let cells: Vec<String> = row
                    .cells
                    .iter()
                    .map(|c| match &c.issue {
                        Some(issue) => format!("{} (⚠ {})", c.value.as_deref().unwrap_or(""), issue),
                        None => c.value.clone().unwrap_or_default(),
                    })
                    .collect();
                println!("{}: {}", row.line, cells.join(" | "));
            }
        }
    }
    Ok(())
}

// ============================================================================
// EXPORT
// ============================================================================

fn run_export(config: &ExchangeConfig, args: ExportArgs) -> Result<()> {
    let template = open_templates(config)?.get(args.template)?;
    let store = open_records(config)?;

    let format = args
        .format
        .as_deref()
        .map(str::parse::<ExportFormat>)
        .transpose()
        .map_err(|e| anyhow!(e))?;
    let audience: Audience = args.audience.parse().map_err(|e: String| anyhow!(e))?;
    let query = ExportQuery {
        criteria: ExportCriteria {
            audience,
            center: args.center,
            stage: args.stage,
            course: args.course,
            group: args.group,
        },
        included_fields: (!args.fields.is_empty()).then_some(args.fields),
    };

    let pipeline = ExportPipeline::new(&store);

    if args.preview {
        if let Some(format) = format {
            let content = pipeline.render_preview(&template, &query, config.preview_limit, format)?;
            println!("{}", content.trim_start_matches('\u{FEFF}'));
            return Ok(());
        }

        let preview = pipeline.preview(&template, &query, config.preview_limit)?;
        println!("{}", preview.columns.join(" | "));
        for row in &preview.rows {
            println!("{}", row.texts().join(" | "));
        }
        println!("\n({} rows shown, limit {})", preview.rows.len(), config.preview_limit);
        return Ok(());
    }

    let artifact = pipeline.export(&template, &query, format.unwrap_or_default())?;
    let path = args.out.unwrap_or_else(|| PathBuf::from(&artifact.file_name));
    write_file(&path, &artifact.content)?;

    println!("✓ Exported {} rows to {}", artifact.row_count, path.display());
    Ok(())
}

// ============================================================================
// TEMPLATES & SCHEMA
// ============================================================================

fn run_templates(config: &ExchangeConfig, action: TemplateAction) -> Result<()> {
    let store = open_templates(config)?;

    match action {
        TemplateAction::List { family, search } => {
            let family = family
                .map(|f| f.parse::<TemplateFamily>())
                .transpose()
                .map_err(|e| anyhow!(e))?;
            let templates = store.search(family, search.as_deref().unwrap_or(""))?;

            if templates.is_empty() {
                println!("No templates saved yet.");
            }
            for template in templates {
                print_template_line(&template);
            }
        }
        TemplateAction::Show { id } => {
            let template = store.get(id)?;
            println!("{}", serde_json::to_string_pretty(&template)?);
        }
        TemplateAction::Save { file } => {
            let json = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let template: Template = serde_json::from_str(&json).context("Invalid template JSON")?;
            let saved = store.save(template)?;
            print_template_line(&saved);
        }
        TemplateAction::Remove { id } => {
            store.remove(id)?;
            println!("✓ Template {} removed", id);
        }
        TemplateAction::Duplicate { id } => {
            let copy = store.save(store.get(id)?.duplicate())?;
            print_template_line(&copy);
        }
        TemplateAction::Header { id, out } => {
            let template = store.get(id)?;
            if template.family != TemplateFamily::Import {
                bail!("'{}' is not an import template", template.name);
            }
            let path = out.unwrap_or_else(|| PathBuf::from(template.header_file_name()));
            write_file(&path, &template.header_file()?)?;
            println!("✓ Header file written to {}", path.display());
        }
    }
    Ok(())
}

fn print_template_line(template: &Template) {
    println!(
        "{}  [{}] {} (v{}, {} fields)",
        template.id.map(|id| id.to_string()).unwrap_or_default(),
        template.family.code(),
        template.name,
        template.version,
        template.fields.len()
    );
}

fn run_schema(config: &ExchangeConfig, kind: &str) -> Result<()> {
    let kind: EntityKind = kind.parse().map_err(|e: String| anyhow!(e))?;
    let store = open_records(config)?;

    println!("🏛️  {} attributes", kind.label());
    for attribute in store.schema(kind)? {
        println!(
            "   {:<28} {:<10} {}",
            attribute.qualified_name(),
            attribute.value_type.label(),
            attribute.label
        );
    }
    Ok(())
}

fn run_runs(config: &ExchangeConfig) -> Result<()> {
    let store = open_records(config)?;

    for run in store.list_import_runs()? {
        println!(
            "{}  {:<8} {:<30} {}/{} ok, {} errors",
            run.finished_at.format("%Y-%m-%d %H:%M"),
            run.shape.code(),
            run.source_name.as_deref().unwrap_or("-"),
            run.outcome.success,
            run.outcome.total,
            run.outcome.errors
        );
    }
    Ok(())
}

// ============================================================================
// HELPERS
// ============================================================================

fn open_records(config: &ExchangeConfig) -> Result<SqliteRecordStore> {
    SqliteRecordStore::open(&config.database_path)
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))
}

fn open_templates(config: &ExchangeConfig) -> Result<SqliteTemplateStore> {
    SqliteTemplateStore::open(&config.database_path)
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}
