use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;

use aircast_core::{
    load_config, parse_sources, stream_args, validate_sources, AircastConfig, DriveLinkValidator,
    MediaFileValidator, RecurrencePattern, RecurrenceRule, StreamRequest,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] aircast_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("recurrence error: {0}")]
    Recurrence(#[from] aircast_core::RecurrenceError),
    #[error("authentication failed")]
    Authentication,
    #[error("required resource missing: {0}")]
    MissingResource(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Aircast command-line control interface", long_about = None)]
pub struct Cli {
    /// Caminho do aircast.toml principal
    #[arg(long, default_value = "configs/aircast.toml")]
    pub config: PathBuf,

    /// Token para autenticação local (se AIRCASTCTL_TOKEN estiver definido)
    #[arg(long)]
    pub token: Option<String>,

    /// Formato de saída
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Verificações do arquivo de configuração
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Consultas sobre regras de recorrência
    #[command(subcommand)]
    Schedule(ScheduleCommands),
    /// Operações da fila de processamento em lote
    #[command(subcommand)]
    Batch(BatchCommands),
    /// Inspeção do comando do encoder
    #[command(subcommand)]
    Encoder(EncoderCommands),
    /// Gera completions para o shell informado
    Completions(CompletionsArgs),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Carrega o aircast.toml e executa verificações básicas
    Check,
}

#[derive(Subcommand, Debug)]
pub enum ScheduleCommands {
    /// Lista as próximas ocorrências de uma regra de recorrência
    Next(ScheduleNextArgs),
}

#[derive(Args, Debug)]
pub struct ScheduleNextArgs {
    /// Padrão de recorrência (daily ou weekly)
    #[arg(long, default_value = "daily")]
    pub pattern: String,

    /// Horário no formato HH:MM, interpretado em UTC
    #[arg(long)]
    pub time: String,

    /// Dias da semana para regras weekly (0=domingo .. 6=sábado)
    #[arg(long, value_delimiter = ',')]
    pub days: Vec<u8>,

    /// Instante de referência em RFC 3339 (padrão: agora)
    #[arg(long)]
    pub from: Option<String>,

    /// Quantidade de ocorrências a listar
    #[arg(long, default_value_t = 3)]
    pub count: usize,
}

#[derive(Subcommand, Debug)]
pub enum BatchCommands {
    /// Valida uma lista de fontes antes de enfileirar
    Validate(BatchValidateArgs),
}

#[derive(Args, Debug)]
pub struct BatchValidateArgs {
    /// Arquivo texto com uma fonte por linha
    #[arg(long)]
    pub file: PathBuf,

    /// Tipo de fonte esperado
    #[arg(long, value_enum, default_value_t = SourceKind::Drive)]
    pub kind: SourceKind,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SourceKind {
    /// Links de compartilhamento do Google Drive
    Drive,
    /// Caminhos de arquivos de mídia locais
    Media,
}

#[derive(Subcommand, Debug)]
pub enum EncoderCommands {
    /// Mostra a linha de comando do encoder para uma transmissão
    Preview(EncoderPreviewArgs),
}

#[derive(Args, Debug)]
pub struct EncoderPreviewArgs {
    /// Identificador da transmissão
    #[arg(long, default_value = "preview")]
    pub stream_id: String,

    /// Caminho do arquivo de mídia principal
    #[arg(long)]
    pub media: String,

    /// Trilha de áudio opcional reproduzida em loop
    #[arg(long)]
    pub audio: Option<String>,

    /// Destino RTMP da transmissão
    #[arg(long)]
    pub destination: String,

    /// Duração planejada em segundos
    #[arg(long)]
    pub duration: Option<i64>,

    /// Reproduz o vídeo de entrada em loop
    #[arg(long, default_value_t = false)]
    pub loop_video: bool,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell alvo
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}

pub fn run(cli: Cli) -> Result<()> {
    enforce_token(&cli)?;

    if let Commands::Completions(args) = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(args.shell, &mut command, "aircastctl", &mut std::io::stdout());
        return Ok(());
    }

    let context = AppContext::new(&cli)?;
    match &cli.command {
        Commands::Config(ConfigCommands::Check) => {
            let report = context.config_check();
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "uma ou mais verificações falharam".to_string(),
                ));
            }
        }
        Commands::Schedule(ScheduleCommands::Next(args)) => {
            let report = schedule_next(args)?;
            render(&report, cli.format)?;
        }
        Commands::Batch(BatchCommands::Validate(args)) => {
            let report = context.batch_validate(args)?;
            render(&report, cli.format)?;
        }
        Commands::Encoder(EncoderCommands::Preview(args)) => {
            let report = context.encoder_preview(args);
            render(&report, cli.format)?;
        }
        Commands::Completions(_) => {}
    }

    Ok(())
}

fn enforce_token(cli: &Cli) -> Result<()> {
    if let Ok(expected) = std::env::var("AIRCASTCTL_TOKEN") {
        match &cli.token {
            Some(provided) if provided == &expected => Ok(()),
            _ => Err(AppError::Authentication),
        }
    } else {
        Ok(())
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

fn schedule_next(args: &ScheduleNextArgs) -> Result<ScheduleNextReport> {
    let pattern: RecurrencePattern = args.pattern.parse()?;
    let rule = match pattern {
        RecurrencePattern::Daily => RecurrenceRule::daily(&args.time),
        RecurrencePattern::Weekly => RecurrenceRule::weekly(&args.time, &args.days),
    };
    rule.validate()?;

    let from = match &args.from {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map_err(|err| AppError::InvalidArgument(format!("instante inválido {raw}: {err}")))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let mut runs = Vec::with_capacity(args.count);
    let mut cursor = from;
    for _ in 0..args.count {
        let next = rule.next_run(cursor)?;
        runs.push(next);
        cursor = next;
    }

    Ok(ScheduleNextReport {
        pattern: pattern.to_string(),
        time_of_day: args.time.clone(),
        days_of_week: args.days.clone(),
        from,
        runs,
    })
}

#[derive(Debug)]
struct AppContext {
    config: AircastConfig,
    config_path: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone();
        let config = load_config(&config_path)?;
        Ok(Self {
            config,
            config_path,
        })
    }

    fn config_check(&self) -> Vec<CheckEntry> {
        let supervisor = &self.config.supervisor;
        vec![
            CheckEntry::ok("aircast.toml", self.config_path.display().to_string()),
            self.check_encoder_binary(),
            CheckEntry::ok(
                "supervisor",
                format!(
                    "poll a cada {}s, tolerância de {}s, saída precoce: {}",
                    supervisor.poll_interval_seconds,
                    supervisor.planned_exit_tolerance_s,
                    supervisor.premature_exit.as_str()
                ),
            ),
            CheckEntry::ok(
                "batch",
                format!(
                    "{} extensões de mídia aceitas",
                    self.config.batch.media_extensions.len()
                ),
            ),
        ]
    }

    fn check_encoder_binary(&self) -> CheckEntry {
        let binary = Path::new(&self.config.encoder.ffmpeg_binary);
        if binary.is_absolute() {
            if binary.exists() {
                CheckEntry::ok("encoder", binary.display().to_string())
            } else {
                CheckEntry::error("encoder", format!("{} ausente", binary.display()))
            }
        } else {
            match find_in_path(&self.config.encoder.ffmpeg_binary) {
                Some(resolved) => CheckEntry::ok("encoder", resolved.display().to_string()),
                None => CheckEntry::warn(
                    "encoder",
                    format!(
                        "{} não encontrado no PATH",
                        self.config.encoder.ffmpeg_binary
                    ),
                ),
            }
        }
    }

    fn batch_validate(&self, args: &BatchValidateArgs) -> Result<BatchValidateReport> {
        let raw = fs::read_to_string(&args.file)?;
        let sources = parse_sources(&raw);
        let report = match args.kind {
            SourceKind::Drive => validate_sources(&sources, &DriveLinkValidator::new()),
            SourceKind::Media => {
                let validator = MediaFileValidator::from_config(&self.config.batch);
                validate_sources(&sources, &validator)
            }
        };
        Ok(BatchValidateReport {
            file: args.file.clone(),
            total: sources.len(),
            valid: report.valid,
            invalid: report.invalid,
        })
    }

    fn encoder_preview(&self, args: &EncoderPreviewArgs) -> EncoderPreviewReport {
        let request = StreamRequest {
            stream_id: args.stream_id.clone(),
            media_path: args.media.clone(),
            audio_path: args.audio.clone(),
            destination: args.destination.clone(),
            duration_s: args.duration,
            loop_video: args.loop_video,
        };
        let arguments = stream_args(&request, &self.config.encoder);
        EncoderPreviewReport {
            binary: self.config.encoder.ffmpeg_binary.clone(),
            arguments,
        }
    }
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.exists())
}

#[derive(Debug, Serialize)]
pub struct ScheduleNextReport {
    pub pattern: String,
    pub time_of_day: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub days_of_week: Vec<u8>,
    pub from: DateTime<Utc>,
    pub runs: Vec<DateTime<Utc>>,
}

impl DisplayFallback for ScheduleNextReport {
    fn display(&self) -> String {
        if self.runs.is_empty() {
            return "Nenhuma ocorrência calculada".to_string();
        }
        let mut lines = vec![format!(
            "Próximas execuções ({} às {}):",
            self.pattern, self.time_of_day
        )];
        for run in &self.runs {
            lines.push(format!("  - {}", run.to_rfc3339()));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct BatchValidateReport {
    pub file: PathBuf,
    pub total: usize,
    pub valid: Vec<String>,
    pub invalid: Vec<String>,
}

impl DisplayFallback for BatchValidateReport {
    fn display(&self) -> String {
        if self.total == 0 {
            return "Nenhuma fonte encontrada".to_string();
        }
        let mut lines = vec![format!(
            "{} de {} fontes válidas",
            self.valid.len(),
            self.total
        )];
        for source in &self.invalid {
            lines.push(format!("  inválida: {source}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct EncoderPreviewReport {
    pub binary: String,
    pub arguments: Vec<String>,
}

impl DisplayFallback for EncoderPreviewReport {
    fn display(&self) -> String {
        format!("{} {}", self.binary, self.arguments.join(" "))
    }
}

#[derive(Debug, Serialize)]
pub struct CheckEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

impl CheckEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Ok => write!(f, "OK"),
            CheckStatus::Warn => write!(f, "WARN"),
            CheckStatus::Error => write!(f, "ERROR"),
        }
    }
}

impl DisplayFallback for Vec<CheckEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(|entry| format!("[{}] {} — {}", entry.status, entry.name, entry.detail))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
