//! Storyworld command-line front end.
//!
//! Commands:
//! - `init <title> --theme <text>` - create a world
//! - `generate <slug>` - write the next chapter, streaming progress
//! - `reroll <slug> <chapter>` - rewrite a chapter in place
//! - `choose <slug> <chapter>` - commit the reader's choice
//! - `regen-image <slug> <chapter>` - render a chapter's scene again
//! - `show <slug> [chapter]` - print a world overview or one chapter
//! - `list` - list stored worlds
//! - `presets` - list narrative presets and style packs
//! - `delete-latest <slug> --reason <text>` - remove the final chapter
//!
//! API keys are read from the environment (or a `.env` file); engine
//! settings from `STORYWORLD_*` variables.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use providers::{AspectRatio, ProviderKeys, ProviderRegistry};
use storyworld_core::presets::{self, ChapterLength, MaturityLevel};
use storyworld_core::styles;
use storyworld_core::{
    slugify, ChoiceSelection, EngineConfig, GenerationRequest, JobEvent, JobId, JobOutcome,
    ReasoningSource, Storyworld, WorldConfig, WorldSlug,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "storyworld")]
#[command(about = "Generate illustrated chapters for persistent story worlds")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding all worlds (overrides STORYWORLD_WORLDS_DIR)
    #[arg(long, global = true)]
    worlds_dir: Option<String>,

    /// Verbose logging (-v, -vv for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new world
    Init {
        title: String,
        /// One-line premise of the world
        #[arg(long)]
        theme: String,
        /// Explicit slug (derived from the title otherwise)
        #[arg(long)]
        slug: Option<String>,
        #[arg(long, default_value = presets::DEFAULT_PRESET)]
        preset: String,
        #[arg(long, default_value = styles::DEFAULT_STYLE)]
        style: String,
        #[arg(long, value_enum, default_value_t = Maturity::General)]
        maturity: Maturity,
        #[arg(long, value_enum, default_value_t = Length::Medium)]
        length: Length,
        #[arg(long, value_enum, default_value_t = Aspect::Landscape)]
        aspect: Aspect,
        #[arg(long, default_value = "openai")]
        text_provider: String,
        #[arg(long)]
        text_model: Option<String>,
        #[arg(long, default_value = "pollinations")]
        image_provider: String,
        #[arg(long)]
        image_model: Option<String>,
        /// Offer reader choices at the end of each chapter
        #[arg(long)]
        choices: bool,
        /// Standing lore included in every prompt
        #[arg(long)]
        memory: Option<String>,
        #[arg(long)]
        authors_note: Option<String>,
        #[arg(long)]
        instructions: Option<String>,
    },
    /// Write the next chapter
    Generate {
        slug: String,
        /// Steering text for this chapter
        #[arg(long)]
        focus: Option<String>,
        #[arg(long)]
        no_image: bool,
    },
    /// Rewrite an existing chapter in place
    Reroll {
        slug: String,
        chapter: u32,
        #[arg(long)]
        focus: Option<String>,
        #[arg(long)]
        no_image: bool,
    },
    /// Commit the reader's choice on a chapter
    Choose {
        slug: String,
        chapter: u32,
        /// Choice id; picks one at random when omitted
        #[arg(long)]
        choice: Option<String>,
        /// Why the reader picked it
        #[arg(long, conflicts_with = "infer")]
        reason: Option<String>,
        /// Ask the world's text provider for the reasoning
        #[arg(long)]
        infer: bool,
    },
    /// Render a chapter's scene image again, bypassing the cache
    RegenImage { slug: String, chapter: u32 },
    /// Print a world overview, or one chapter's markdown
    Show { slug: String, chapter: Option<u32> },
    /// List stored worlds
    List,
    /// List narrative presets and style packs
    Presets,
    /// Remove the final chapter of a world
    DeleteLatest {
        slug: String,
        #[arg(long)]
        reason: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Maturity {
    General,
    Teen,
    Mature,
    Explicit,
}

impl From<Maturity> for MaturityLevel {
    fn from(m: Maturity) -> Self {
        match m {
            Maturity::General => MaturityLevel::General,
            Maturity::Teen => MaturityLevel::Teen,
            Maturity::Mature => MaturityLevel::Mature,
            Maturity::Explicit => MaturityLevel::Explicit,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Length {
    Short,
    Medium,
    Long,
}

impl From<Length> for ChapterLength {
    fn from(l: Length) -> Self {
        match l {
            Length::Short => ChapterLength::Short,
            Length::Medium => ChapterLength::Medium,
            Length::Long => ChapterLength::Long,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Aspect {
    Landscape,
    Square,
    Classic,
    Portrait,
}

impl From<Aspect> for AspectRatio {
    fn from(a: Aspect) -> Self {
        match a {
            Aspect::Landscape => AspectRatio::Landscape,
            Aspect::Square => AspectRatio::Square,
            Aspect::Classic => AspectRatio::Classic,
            Aspect::Portrait => AspectRatio::Portrait,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let mut config = EngineConfig::from_env();
    if let Some(dir) = &cli.worlds_dir {
        config = config.with_worlds_dir(dir);
    }
    let registry = ProviderRegistry::from_keys(&ProviderKeys::from_env());
    let engine = Storyworld::new(config, registry);

    match cli.command {
        Commands::Init {
            title,
            theme,
            slug,
            preset,
            style,
            maturity,
            length,
            aspect,
            text_provider,
            text_model,
            image_provider,
            image_model,
            choices,
            memory,
            authors_note,
            instructions,
        } => {
            let slug = match slug {
                Some(raw) => WorldSlug::parse(&raw)?,
                None => slugify(&title)?,
            };
            let mut world = WorldConfig::new(title, theme, slug)
                .with_preset(preset)
                .with_style(style)
                .with_maturity(maturity.into())
                .with_chapter_length(length.into())
                .with_text_provider(text_provider, text_model)
                .with_image_provider(image_provider, image_model)
                .with_choices(choices);
            world.aspect_ratio = aspect.into();
            if let Some(memory) = memory {
                world = world.with_memory(memory);
            }
            if let Some(note) = authors_note {
                world = world.with_authors_note(note);
            }
            if let Some(instructions) = instructions {
                world = world.with_world_instructions(instructions);
            }
            if engine.registry().text(&world.text_provider).is_none() {
                warn!(
                    provider = %world.text_provider,
                    "text provider not configured; set its API key before generating"
                );
            }

            let world = engine.create_world(world).await?;
            println!("Created world '{}' ({})", world.title, world.slug);
        }
        Commands::Generate {
            slug,
            focus,
            no_image,
        } => {
            let request = request(&slug, focus, no_image)?;
            let job = engine.start_generation(request).await?;
            follow(&engine, job).await?;
        }
        Commands::Reroll {
            slug,
            chapter,
            focus,
            no_image,
        } => {
            let request = request(&slug, focus, no_image)?;
            let job = engine.start_reroll(request, chapter).await?;
            follow(&engine, job).await?;
        }
        Commands::Choose {
            slug,
            chapter,
            choice,
            reason,
            infer,
        } => {
            let slug = WorldSlug::parse(&slug)?;
            let selection = match choice {
                Some(id) => ChoiceSelection::Id(id),
                None => ChoiceSelection::Auto,
            };
            let reasoning = match (reason, infer) {
                (Some(text), _) => ReasoningSource::Provided(text),
                (None, true) => ReasoningSource::Infer,
                (None, false) => ReasoningSource::None,
            };
            let selected = engine
                .select_choice(&slug, chapter, selection, reasoning)
                .await?;
            println!(
                "Chapter {}: chose [{}] {}",
                selected.chapter, selected.choice.id, selected.choice.text
            );
            if let Some(reasoning) = selected.reasoning {
                println!("  Reasoning: {reasoning}");
            }
        }
        Commands::RegenImage { slug, chapter } => {
            let slug = WorldSlug::parse(&slug)?;
            let image = engine.regenerate_image(&slug, chapter).await?;
            let path = engine.store().world_dir(&slug).join(&image.path);
            println!("New scene image: {}", path.display());
        }
        Commands::Show { slug, chapter } => {
            let slug = WorldSlug::parse(&slug)?;
            match chapter {
                Some(number) => print!("{}", engine.chapter_markdown(&slug, number).await?),
                None => show_world(&engine, &slug).await?,
            }
        }
        Commands::List => {
            let worlds = engine.list_worlds().await?;
            if worlds.is_empty() {
                println!("No worlds in {}", engine.config().worlds_dir.display());
            }
            for world in worlds {
                println!(
                    "{:<32} {:>4} chapter(s)  {} - {}",
                    world.slug.as_str(),
                    world.chapters,
                    world.title,
                    world.theme
                );
            }
        }
        Commands::Presets => {
            println!("Presets:");
            for preset in presets::PRESETS.values() {
                println!("  {:<22} {}", preset.key, preset.description);
            }
            println!("\nStyle packs:");
            for pack in styles::STYLE_PACKS.values() {
                println!("  {:<22} {}", pack.key, pack.name);
            }
        }
        Commands::DeleteLatest { slug, reason } => {
            let slug = WorldSlug::parse(&slug)?;
            let record = engine.delete_latest_chapter(&slug, reason).await?;
            println!(
                "Deleted chapter {} '{}' ({} entities removed)",
                record.chapter,
                record.title,
                record.removed_entities.len()
            );
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) -> Result<()> {
    let directive = match verbose {
        0 => "storyworld=info",
        1 => "storyworld=debug",
        _ => "storyworld=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(directive.parse()?)
                .add_directive("storyworld_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn request(slug: &str, focus: Option<String>, no_image: bool) -> Result<GenerationRequest> {
    let mut request = GenerationRequest::new(WorldSlug::parse(slug)?).with_image(!no_image);
    if let Some(focus) = focus {
        request = request.with_focus(focus);
    }
    Ok(request)
}

/// Print progress until the job finishes.
async fn follow(engine: &Storyworld, job: JobId) -> Result<()> {
    let mut events = engine
        .subscribe(job)
        .context("job disappeared before it could be observed")?;

    while let Some(event) = events.next().await {
        match event {
            JobEvent::Progress(progress) => {
                eprintln!("[{:>3}%] {:<10} {}", progress.percent, progress.stage, progress.message);
            }
            JobEvent::Finished(JobOutcome::Completed(generated)) => {
                let chapter = &generated.chapter;
                println!("\nChapter {}: {}", chapter.number, chapter.title);
                if !chapter.meta.summary.is_empty() {
                    println!("  {}", chapter.meta.summary);
                }
                if let Some(image) = &chapter.image {
                    println!("  Scene: {}", image.path);
                }
                for choice in &chapter.meta.choices {
                    println!("  [{}] {}", choice.id, choice.text);
                }
                for warning in &generated.warnings {
                    println!("  warning: {warning}");
                }
                return Ok(());
            }
            JobEvent::Finished(JobOutcome::Failed { error }) => bail!("generation failed: {error}"),
        }
    }
    bail!("job ended without a result")
}

async fn show_world(engine: &Storyworld, slug: &WorldSlug) -> Result<()> {
    let (config, state) = engine.load_world(slug).await?;
    println!("{} ({})", config.title, config.slug);
    println!("  {}", config.theme);
    println!(
        "  preset: {}  style: {}  text: {}  image: {}",
        config.preset, config.style_pack, config.text_provider, config.image_provider
    );
    println!(
        "  {} chapter(s), {} entities, {} generation(s)",
        state.chapters.len(),
        state.entity_count(),
        state.tick
    );
    for chapter in &state.chapters {
        let selected = chapter
            .selected_choice()
            .map(|c| format!("  -> {}", c.text))
            .unwrap_or_default();
        println!("  {:>3}. {}{selected}", chapter.number, chapter.title);
    }
    for record in &state.audit_log {
        println!(
            "  deleted chapter {} '{}' at {}: {}",
            record.chapter, record.title, record.deleted_at, record.reason
        );
    }
    Ok(())
}
