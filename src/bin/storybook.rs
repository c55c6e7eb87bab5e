//! CLI binary for edgequake-storybook.
//!
//! A thin shim over the library crate that maps CLI flags to `StoryConfig`,
//! runs the server or a single generation, and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_storybook::server::{serve, ServerOptions};
use edgequake_storybook::{
    generate_story, list_stories, render_story_pdf, CharacterStrategy, GenerationProgressCallback,
    ImageSlot, ProgressCallback, StoryConfig, StoryRequest, StoryRequestBody,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Renders one line per illustration above a progress bar. Images complete
/// out of order, so start times are tracked per slot.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<ImageSlot, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner);
        bar.set_prefix("Writing");
        bar.set_message("story text…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed(&self, slot: ImageSlot) -> String {
        let secs = self
            .start_times
            .lock()
            .map(|mut m| m.remove(&slot))
            .ok()
            .flatten()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        dim(&format!("{secs:.1}s"))
    }
}

impl GenerationProgressCallback for CliProgressCallback {
    fn on_generation_start(&self, title: &str, total_images: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>2}/{len} images  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(total_images as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Illustrating");
        self.bar
            .println(format!("{} {}", bold("◆"), bold(&format!("\"{title}\""))));
    }

    fn on_retry_pass(&self, retrying: usize) {
        self.bar.inc_length(retrying as u64);
        self.bar.set_prefix("Retrying");
    }

    fn on_image_start(&self, slot: ImageSlot, _total_images: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(slot, Instant::now());
        }
        self.bar.set_message(slot.to_string());
    }

    fn on_image_complete(&self, slot: ImageSlot, _total_images: usize, placeholder: bool) {
        let mark = if placeholder {
            yellow("○")
        } else {
            green("✓")
        };
        let elapsed = self.elapsed(slot);
        self.bar.println(format!("  {mark} {:<16} {elapsed}", slot.to_string()));
        self.bar.inc(1);
    }

    fn on_image_error(&self, slot: ImageSlot, _total_images: usize, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };
        let elapsed = self.elapsed(slot);
        self.bar
            .println(format!("  {} {:<16} {}  {elapsed}", red("✗"), slot.to_string(), red(&msg)));
        self.bar.inc(1);
    }

    fn on_generation_complete(&self, total_images: usize, generated: usize) {
        self.bar.finish_and_clear();
        if generated == total_images {
            eprintln!("{} {} images generated", green("✔"), bold(&generated.to_string()));
        } else {
            eprintln!(
                "{} {}/{} images generated, {} placeholder(s)",
                yellow("⚠"),
                bold(&generated.to_string()),
                total_images,
                total_images - generated,
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve the HTTP API on port 3000
  storybook serve

  # Generate a story with placeholder images (no image API key needed)
  storybook --placeholders generate --child-name Ana --theme moral-values \
      --style pixar-style --language spanish

  # Generate and bind the PDF
  storybook generate --child-name Leo --theme space --style watercolor \
      --language english --age 5 --pdf

  # List stored stories, render one to PDF
  storybook list
  storybook pdf ana_y_la_verdad -o ana.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI key (text and images)
  ANTHROPIC_API_KEY       Anthropic key (text)
  EDGEQUAKE_LLM_PROVIDER  Override text provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override text model ID
  RUST_LOG                Log filter, e.g. edgequake_storybook=debug

A .env file in the working directory is loaded on startup.
"#;

/// Generate illustrated children's storybooks.
#[derive(Parser, Debug)]
#[command(
    name = "storybook",
    version,
    about = "Generate illustrated children's storybooks with LLMs and image models",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Directory holding one folder per story.
    #[arg(long, global = true, env = "STORYBOOK_STORIES_DIR", default_value = "stories")]
    stories_dir: PathBuf,

    /// Number of story pages (1–20).
    #[arg(long, global = true, env = "STORYBOOK_PAGES", default_value_t = 8)]
    pages: usize,

    /// Text model ID (e.g. gpt-4.1-mini).
    #[arg(long, global = true, env = "STORYBOOK_TEXT_MODEL")]
    model: Option<String>,

    /// Text provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "STORYBOOK_TEXT_PROVIDER")]
    provider: Option<String>,

    /// Story text temperature (0.0–2.0).
    #[arg(long, global = true, env = "STORYBOOK_TEMPERATURE", default_value_t = 0.8)]
    temperature: f32,

    /// How the protagonist profile is derived.
    #[arg(long, global = true, env = "STORYBOOK_CHARACTER", value_enum, default_value = "model")]
    character: CharacterArg,

    /// Image model ID.
    #[arg(long, global = true, env = "STORYBOOK_IMAGE_MODEL", default_value = "dall-e-3")]
    image_model: String,

    /// Base URL of an OpenAI-compatible images API.
    #[arg(long, global = true, env = "STORYBOOK_IMAGE_API_BASE")]
    image_api_base: Option<String>,

    /// Images API key (defaults to OPENAI_API_KEY).
    #[arg(long, global = true, env = "STORYBOOK_IMAGE_API_KEY", hide_env_values = true)]
    image_api_key: Option<String>,

    /// Requested image size.
    #[arg(long, global = true, env = "STORYBOOK_IMAGE_SIZE", default_value = "1024x1024")]
    image_size: String,

    /// Use placeholder images instead of calling the image model.
    #[arg(long, global = true, env = "STORYBOOK_PLACEHOLDERS")]
    placeholders: bool,

    /// Attempts per image before falling back to a placeholder.
    #[arg(long, global = true, env = "STORYBOOK_IMAGE_ATTEMPTS", default_value_t = 2)]
    image_attempts: u32,

    /// Image requests allowed per rate window.
    #[arg(long, global = true, env = "STORYBOOK_RATE_LIMIT", default_value_t = 5)]
    rate_limit: usize,

    /// Rate window length in milliseconds.
    #[arg(long, global = true, env = "STORYBOOK_RATE_WINDOW_MS", default_value_t = 61_000)]
    rate_window_ms: u64,

    /// Skip the second pass over failed images.
    #[arg(long, global = true, env = "STORYBOOK_NO_RETRY_PASS")]
    no_retry_pass: bool,

    /// Also render a character reference portrait.
    #[arg(long, global = true, env = "STORYBOOK_CHARACTER_REFERENCE")]
    character_reference: bool,

    /// TrueType font embedded in PDFs (Helvetica when unset).
    #[arg(long, global = true, env = "STORYBOOK_FONT")]
    font: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "STORYBOOK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "STORYBOOK_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API.
    Serve {
        #[arg(long, env = "STORYBOOK_HOST", default_value = "127.0.0.1")]
        host: String,

        #[arg(short, long, env = "STORYBOOK_PORT", default_value_t = 3000)]
        port: u16,

        /// Allowed CORS origin (repeatable). Any origin when unset.
        #[arg(long = "cors-origin", env = "STORYBOOK_CORS_ORIGINS", value_delimiter = ',')]
        cors_origins: Vec<String>,

        /// URL prefix of the stories directory in image locations.
        #[arg(long, env = "STORYBOOK_PUBLIC_BASE_URL", default_value = "/stories")]
        public_base_url: String,
    },

    /// Generate one story.
    Generate {
        #[arg(long, env = "STORYBOOK_CHILD_NAME")]
        child_name: String,

        /// adventure, friendship, moral-values, nature, space, animals, bedtime, fantasy.
        #[arg(long, env = "STORYBOOK_THEME")]
        theme: String,

        /// pixar-style, watercolor, cartoon, classic-storybook, anime, pencil-sketch, paper-cutout.
        #[arg(long, env = "STORYBOOK_STYLE")]
        style: String,

        /// english, spanish, french, german, portuguese, italian.
        #[arg(long, env = "STORYBOOK_LANGUAGE", default_value = "english")]
        language: String,

        /// Age bracket (3-5, 6-8, 9-12) or a single age.
        #[arg(long, env = "STORYBOOK_AGE")]
        age: Option<String>,

        /// Extra instructions for the story.
        #[arg(long)]
        prompt: Option<String>,

        /// Also write the full output JSON (with diagnostics) to this file.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Render the PDF once the story is saved.
        #[arg(long)]
        pdf: bool,

        /// Disable the progress bar.
        #[arg(long, env = "STORYBOOK_NO_PROGRESS")]
        no_progress: bool,
    },

    /// List stored stories.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Render a stored story to PDF.
    Pdf {
        /// Story folder name (see `storybook list`).
        story: String,

        /// Copy the PDF to this path as well.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum CharacterArg {
    Model,
    Heuristic,
}

impl From<CharacterArg> for CharacterStrategy {
    fn from(v: CharacterArg) -> Self {
        match v {
            CharacterArg::Model => CharacterStrategy::Model,
            CharacterArg::Heuristic => CharacterStrategy::Heuristic,
        }
    }
}

fn build_config(
    args: &CommonArgs,
    public_base_url: Option<&str>,
    progress: Option<ProgressCallback>,
) -> Result<StoryConfig> {
    let mut builder = StoryConfig::builder()
        .stories_root(args.stories_dir.clone())
        .page_count(args.pages)
        .temperature(args.temperature)
        .character_strategy(args.character.clone().into())
        .image_model(args.image_model.clone())
        .image_size(args.image_size.clone())
        .use_placeholders(args.placeholders)
        .image_attempts(args.image_attempts)
        .image_requests_per_window(args.rate_limit)
        .rate_window_ms(args.rate_window_ms)
        .retry_failed_pass(!args.no_retry_pass)
        .render_character_reference(args.character_reference);

    if let Some(ref m) = args.model {
        builder = builder.text_model(m.clone());
    }
    if let Some(ref p) = args.provider {
        builder = builder.text_provider_name(p.clone());
    }
    if let Some(ref base) = args.image_api_base {
        builder = builder.image_api_base(base.clone());
    }
    if let Some(ref key) = args.image_api_key {
        builder = builder.image_api_key(key.clone());
    }
    if let Some(ref font) = args.font {
        builder = builder.font_path(font.clone());
    }
    if let Some(base) = public_base_url {
        builder = builder.public_base_url(base);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let common = &cli.common;

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs during generation.
    let show_progress = matches!(
        cli.command,
        Command::Generate { no_progress: false, .. }
    ) && !common.quiet;
    let filter = if common.verbose {
        "debug"
    } else if common.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve {
            ref host,
            port,
            ref cors_origins,
            ref public_base_url,
        } => {
            let config = build_config(common, Some(public_base_url.as_str()), None)?;
            let options = ServerOptions {
                host: host.clone(),
                port,
                cors_origins: cors_origins.clone(),
            };
            serve(config, &options).await.context("Server failed")?;
        }

        Command::Generate {
            ref child_name,
            ref theme,
            ref style,
            ref language,
            ref age,
            ref prompt,
            ref output,
            pdf,
            ..
        } => {
            let progress: Option<ProgressCallback> = if show_progress {
                Some(CliProgressCallback::new() as Arc<dyn GenerationProgressCallback>)
            } else {
                None
            };
            let config = build_config(common, None, progress)?;
            let request = StoryRequest::try_from(StoryRequestBody {
                child_name: Some(child_name.clone()),
                theme: Some(theme.clone()),
                style: Some(style.clone()),
                language: Some(language.clone()),
                age_range: age.clone(),
                custom_prompt: prompt.clone(),
            })?;

            let result = generate_story(&request, &config)
                .await
                .context("Story generation failed")?;

            if let Some(ref path) = output {
                let json = serde_json::to_string_pretty(&result)
                    .context("Failed to serialize story output")?;
                tokio::fs::write(path, json)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }

            if !common.quiet {
                let folder = &result.debug.story_folder;
                eprintln!("{} {}", bold("Title:"), result.story.title);
                eprintln!(
                    "{} {}",
                    bold("Folder:"),
                    common.stories_dir.join(folder).display()
                );
                for warning in &result.debug.warnings {
                    eprintln!("{} {}", yellow("warning:"), warning);
                }
            }

            if pdf {
                let rendered = render_story_pdf(&result.debug.story_folder, &config)
                    .await
                    .context("PDF rendering failed")?;
                if !common.quiet {
                    eprintln!("{} {}", bold("PDF:"), rendered.location);
                }
            }
        }

        Command::List { json } => {
            let config = build_config(common, None, None)?;
            let stories = list_stories(&config).await.context("Failed to list stories")?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&stories).context("Failed to serialize list")?
                );
            } else if stories.is_empty() {
                eprintln!("No stories in {}", common.stories_dir.display());
            } else {
                for s in stories {
                    println!(
                        "{:<40} {:<30} {:>2} pages  {}  {}",
                        s.id,
                        s.title,
                        s.page_count,
                        dim(&s.language),
                        dim(&s.generated_at.format("%Y-%m-%d %H:%M").to_string()),
                    );
                }
            }
        }

        Command::Pdf {
            ref story,
            ref output,
        } => {
            let config = build_config(common, None, None)?;
            let rendered = render_story_pdf(story, &config)
                .await
                .with_context(|| format!("Failed to render '{story}'"))?;
            if let Some(ref path) = output {
                tokio::fs::write(path, &rendered.pdf.bytes)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
            if !common.quiet {
                let missing = rendered.pdf.missing_images.len();
                eprintln!(
                    "{} {} pages → {}",
                    green("✔"),
                    rendered.pdf.pages.len(),
                    output
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or(rendered.location.clone())
                );
                if missing > 0 {
                    eprintln!("{} {missing} image(s) unavailable", yellow("⚠"));
                }
            }
        }
    }

    Ok(())
}
