use checkin_verify::{
    common::paths,
    storage::checkin_url,
    run_check_in, AttendanceBook, CheckInRequest, Config, ConsoleSpeechEngine,
    DescriptorFileProvider, DevMode, PhraseChallenge, SpeechEngine, SpeechMatchResult,
    StudentStore, VerificationSession, VerifyError,
};

use clap::{Parser, Subcommand};
use anyhow::{Context, Result};
use std::io::{BufReader, Stdin};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

type CliSession = VerificationSession<DescriptorFileProvider, ConsoleSpeechEngine<BufReader<Stdin>>>;

#[derive(Parser)]
#[command(name = "checkin-verify")]
#[command(about = "Face and voice-phrase verification for attendance check-in")]
struct Cli {
    /// Enable development mode (saves data to ./dev_data)
    #[arg(long, global = true)]
    dev: bool,

    /// Config file (defaults to configs/checkin-verify.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a student's face from a descriptor file
    Enroll {
        #[arg(short, long)]
        student_id: String,
        #[arg(short, long)]
        name: String,
        /// JSON descriptor exported by the face model
        #[arg(short, long)]
        descriptor: PathBuf,
        /// Also run a spoken-phrase challenge
        #[arg(long)]
        speech: bool,
    },
    /// Verify a live descriptor against a student's enrollment
    Verify {
        #[arg(short, long)]
        student_id: String,
        #[arg(short, long)]
        descriptor: PathBuf,
    },
    /// Issue a challenge phrase and score the typed transcript
    Phrase,
    /// Verify an enrolled student's voice with a phrase challenge
    EnrollVoice {
        #[arg(short, long)]
        student_id: String,
    },
    /// Poll a descriptor file and report each detection
    Watch {
        #[arg(short, long)]
        descriptor: PathBuf,
        /// Polling interval (defaults to the configured interval)
        #[arg(short, long)]
        interval_ms: Option<u64>,
        /// Stop after this many seconds
        #[arg(long, default_value = "10")]
        duration_secs: u64,
        /// Compare each detection against this student's enrollment
        #[arg(long)]
        student_id: Option<String>,
    },
    /// Manage the check-in session token
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// Check a student in (face required, voice optional)
    Checkin {
        #[arg(short, long)]
        token: String,
        #[arg(short, long)]
        student_id: String,
        #[arg(short, long)]
        descriptor: PathBuf,
        #[arg(short, long)]
        name: Option<String>,
        /// Require a matched spoken phrase as well
        #[arg(long)]
        voice: bool,
    },
    /// List enrolled students
    Students,
    /// Show recent check-ins
    Recent {
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Export attendance to CSV
    Export {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete all attendance records (the session token stays valid)
    Clear {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Start a new session
    Start,
    /// Replace the active token
    Rotate,
    /// Show the active token
    Show,
    /// Print the check-in link for the active session
    Link,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.dev);

    let dev_mode = DevMode::new(cli.dev)?;
    let config = Config::load(cli.config.as_deref())?;
    let data_dir = dev_mode.data_dir()?;

    match cli.command {
        Commands::Enroll { student_id, name, descriptor, speech } => {
            let store = StudentStore::open(paths::students_dir(&data_dir))?;
            let session = open_session(&descriptor, &config);

            println!("Enrolling {} ({})...", name, student_id);
            let enrolled = session.enroll_face()?;

            let speech_verified = if speech {
                session.reset();
                let phrase = session.new_challenge();
                prompt_phrase(&phrase);
                report_phrase(&session.listen_for_phrase()?)
            } else {
                false
            };

            let is_new = store.add_or_update(&name, &student_id, enrolled, speech_verified)?;
            println!(
                "{} {}{}",
                if is_new { "Enrolled" } else { "Updated enrollment for" },
                name,
                if speech_verified { " (speech verified)" } else { "" }
            );
        }
        Commands::Verify { student_id, descriptor } => {
            let store = StudentStore::open(paths::students_dir(&data_dir))?;
            let student = store.get_student(&student_id)?;
            let session = open_session(&descriptor, &config);

            let result = session.verify_face(&student.descriptor)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            println!("Verification: {}", if result.verified { "SUCCESS" } else { "FAILED" });
        }
        Commands::Phrase => {
            let matched = phrase_round(&config)?;
            println!("Phrase: {}", if matched { "MATCHED" } else { "NOT MATCHED" });
        }
        Commands::EnrollVoice { student_id } => {
            let store = StudentStore::open(paths::students_dir(&data_dir))?;
            // Fail before prompting when there is no face enrollment
            let student = store.get_student(&student_id)?;

            if phrase_round(&config)? {
                store.set_speech_verified(&student.student_id)?;
                println!("✓ Voice verified for {}", student.name);
            } else {
                println!("✗ Phrase not matched, voice not recorded");
            }
        }
        Commands::Watch { descriptor, interval_ms, duration_secs, student_id } => {
            let stored = match student_id {
                Some(id) => Some(StudentStore::open(paths::students_dir(&data_dir))?.get_student(&id)?.descriptor),
                None => None,
            };
            let session = Arc::new(open_session(&descriptor, &config));
            let matcher = session.matcher().clone();

            let handle = session.start_continuous_detection(
                interval_ms.map(Duration::from_millis),
                move |result| match result {
                    Ok(Some(sample)) => match &stored {
                        Some(stored) => match matcher.verify(stored, Some(&sample)) {
                            Ok(r) => println!("face: verified={} confidence={}", r.verified, r.confidence_display()),
                            Err(e) => println!("face: {}", e),
                        },
                        None => println!("face detected ({} values)", sample.descriptor.len()),
                    },
                    Ok(None) => println!("no face"),
                    Err(e) => eprintln!("detection error: {}", e),
                },
            )?;

            std::thread::sleep(Duration::from_secs(duration_secs));
            session.stop_continuous_detection(&handle);
            handle.join();
        }
        Commands::Session { command } => {
            let mut book = AttendanceBook::open(paths::attendance_file(&data_dir))?;
            let active = match command {
                SessionCommands::Start => Some(book.start_session()?),
                SessionCommands::Rotate => Some(book.rotate_session()?),
                SessionCommands::Show => book.active_session().cloned(),
                SessionCommands::Link => {
                    match book.checkin_url(&config.attendance.base_url) {
                        Some(url) => println!("{}", url),
                        None => anyhow::bail!("No active session. Start one with: checkin-verify session start"),
                    }
                    return Ok(());
                }
            };
            match active {
                Some(active) => {
                    println!("Session token: {} (created {})", active.token, active.created_at);
                    println!("Check-in link: {}", checkin_url(&config.attendance.base_url, &active.token));
                }
                None => println!("No active session. Start one with: checkin-verify session start"),
            }
        }
        Commands::Checkin { token, student_id, descriptor, name, voice } => {
            let store = StudentStore::open(paths::students_dir(&data_dir))?;
            let mut book = AttendanceBook::open(paths::attendance_file(&data_dir))?;
            let session = open_session(&descriptor, &config);

            let request = CheckInRequest {
                session_token: token,
                student_id,
                name,
                require_voice: voice,
            };
            let report = match run_check_in(&session, &store, &mut book, &request, prompt_phrase) {
                Err(VerifyError::InvalidSessionToken) => {
                    anyhow::bail!("Invalid or expired session token. Ask for the current check-in link.")
                }
                other => other?,
            };

            println!("Face: verified={} confidence={}", report.face.verified, report.face.confidence_display());
            if let Some(voice) = &report.voice {
                println!("Voice: matched={} ({:.0}%)", voice.matched, voice.match_percentage);
            }
            match &report.record {
                Some(record) => println!("✓ Checked in {} at {}", record.name, record.timestamp),
                None => println!("✗ Check-in refused"),
            }
        }
        Commands::Students => {
            let store = StudentStore::open(paths::students_dir(&data_dir))?;
            let students = store.list_students()?;
            if students.is_empty() {
                println!("No students enrolled.");
            }
            for s in students {
                println!("{:<16} {:<24} enrolled {}{}", s.student_id, s.name, s.enrolled_at,
                         if s.speech_verified { " [speech]" } else { "" });
            }
        }
        Commands::Recent { limit } => {
            let book = AttendanceBook::open(paths::attendance_file(&data_dir))?;
            let limit = limit.unwrap_or(config.attendance.recent_limit);
            println!("{} check-in(s) total", book.total());
            for r in book.recent(limit) {
                println!("{}  {:<16} {:<24} face={} voice={}",
                         r.timestamp, r.student_id, r.name, r.face_verified, r.voice_verified);
            }
        }
        Commands::Export { output } => {
            let book = AttendanceBook::open(paths::attendance_file(&data_dir))?;
            let output = output.unwrap_or_else(|| dev_mode.export_path("attendance"));
            let file = std::fs::File::create(&output)
                .with_context(|| format!("Failed to create {}", output.display()))?;
            book.export_csv(std::io::BufWriter::new(file))?;
            println!("Exported {} record(s) to {}", book.total(), output.display());
        }
        Commands::Clear { yes } => {
            if !yes {
                anyhow::bail!("Refusing to delete attendance without --yes");
            }
            let mut book = AttendanceBook::open(paths::attendance_file(&data_dir))?;
            let removed = book.clear()?;
            println!("Attendance cleared ({} record(s) removed)", removed);
        }
    }

    Ok(())
}

fn open_session(descriptor: &Path, config: &Config) -> CliSession {
    VerificationSession::with_config(
        DescriptorFileProvider::new(descriptor),
        ConsoleSpeechEngine::stdin(),
        config,
    )
}

fn prompt_phrase(phrase: &str) {
    println!("Please say (type) the phrase: \"{}\"", phrase);
}

/// Phrase check without a camera: challenge plus console engine only.
fn phrase_round(config: &Config) -> Result<bool> {
    let mut challenge = PhraseChallenge::from_config(config);
    let engine = ConsoleSpeechEngine::stdin();

    prompt_phrase(&challenge.generate_phrase());
    let result = challenge.evaluate(&engine.listen()?)?;
    Ok(report_phrase(&result))
}

fn report_phrase(result: &SpeechMatchResult) -> bool {
    println!("Heard \"{}\" - {:.0}% of the phrase", result.transcript, result.match_percentage);
    result.matched
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }
}
