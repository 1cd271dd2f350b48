use anyhow::Context;
use clap::{Arg, ArgMatches, Command, value_parser};
use log::{error, info};
use screencast::capture::SyntheticWindow;
use screencast::config::{ScreencastConfig, app_name, version};
use screencast::encoder::CodecKind;
use screencast::service::{RecordingMode, ScreencastService, StartRecording};
use screencast::transport::{ControlServer, PipeWriter, SyntheticWindows, spawn_reader};
use std::path::PathBuf;
use std::time::Duration;
use std::{panic, process};
use tokio::sync::mpsc::unbounded_channel;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    let size_args = [
        Arg::new("width")
            .long("width")
            .value_parser(value_parser!(u32))
            .default_value("1280")
            .help("Frame width in pixels."),
        Arg::new("height")
            .long("height")
            .value_parser(value_parser!(u32))
            .default_value("720")
            .help("Frame height in pixels."),
    ];

    Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .global(true)
                .help("JSON configuration file."),
        )
        .arg(
            Arg::new("output-dir")
                .short('o')
                .long("output-dir")
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .global(true)
                .help("Directory for relative recording paths."),
        )
        .arg(
            Arg::new("codec")
                .long("codec")
                .value_parser(["vp8", "vp9"])
                .ignore_case(true)
                .global(true)
                .help("Video codec of recordings."),
        )
        .subcommand(
            Command::new("serve")
                .about("Serve the screencast protocol on stdin/stdout (NUL-delimited JSON).")
                .arg(
                    Arg::new("windows")
                        .long("windows")
                        .value_parser(value_parser!(u64))
                        .default_value("1")
                        .help("Number of synthetic windows, with ids starting at 1."),
                )
                .arg(
                    Arg::new("title-bar")
                        .long("title-bar")
                        .value_parser(value_parser!(u32))
                        .default_value("0")
                        .help("Decoration rows above each synthetic window's page."),
                )
                .args(size_args.clone()),
        )
        .subcommand(
            Command::new("record")
                .about("Record a synthetic window to a video file.")
                .arg(
                    Arg::new("out")
                        .long("out")
                        .value_name("FILE")
                        .value_parser(value_parser!(PathBuf))
                        .required(true),
                )
                .arg(
                    Arg::new("seconds")
                        .long("seconds")
                        .value_parser(value_parser!(u64))
                        .default_value("5")
                        .help("Recording length; Ctrl-C stops early."),
                )
                .arg(
                    Arg::new("fps")
                        .long("fps")
                        .value_parser(value_parser!(u32))
                        .default_value("30")
                        .help("Frame rate of the synthetic window."),
                )
                .args(size_args),
        )
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(105);
    }));

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    // first signal finalizes open recordings, the second one exits right away
    if let Err(e) = ctrlc::set_handler(move || {
        if token.is_cancelled() {
            process::exit(130);
        }
        token.cancel();
    }) {
        error!("Error setting Ctrl-C handler: {}", e);
    }

    if let Err(e) = run(cli().get_matches(), shutdown) {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn run(matches: ArgMatches, shutdown: CancellationToken) -> anyhow::Result<()> {
    let Some((name, sub)) = matches.subcommand() else {
        anyhow::bail!("no subcommand given");
    };
    // global options are propagated into the subcommand's matches
    let config = load_config(sub)?;
    match name {
        "serve" => serve(config, sub, shutdown),
        "record" => record(config, sub, shutdown),
        other => anyhow::bail!("unknown subcommand '{}'", other),
    }
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<ScreencastConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => ScreencastConfig::load(path)?,
        None => ScreencastConfig::default(),
    };
    if let Some(dir) = matches.get_one::<PathBuf>("output-dir") {
        config.output_dir = dir.clone();
    }
    if let Some(codec) = matches.get_one::<String>("codec") {
        config.codec = codec.parse::<CodecKind>().map_err(anyhow::Error::msg)?;
    }
    Ok(config)
}

fn serve(config: ScreencastConfig, matches: &ArgMatches, shutdown: CancellationToken) -> anyhow::Result<()> {
    let count = *matches.get_one::<u64>("windows").unwrap_or(&1);
    let width = *matches.get_one::<u32>("width").unwrap_or(&1280);
    let height = *matches.get_one::<u32>("height").unwrap_or(&720);
    let title_bar = *matches.get_one::<u32>("title-bar").unwrap_or(&0);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the runtime")?;

    let (service, events) = ScreencastService::new(config);
    let provider = SyntheticWindows::new(count, width, height, title_bar);
    let (tx, incoming) = unbounded_channel();
    // The reader blocks on stdin and is left behind at exit.
    spawn_reader(std::io::stdin(), tx).context("failed to spawn the pipe reader")?;
    let writer = PipeWriter::spawn(std::io::stdout()).context("failed to spawn the pipe writer")?;

    info!("{} {} serving {} synthetic window(s) of {}x{}", app_name(), version(), count, width, height);
    let exit = runtime.block_on(ControlServer::new(service, provider).run(incoming, events, writer, shutdown));
    info!("Server stopped: {:?}", exit);
    Ok(())
}

fn record(config: ScreencastConfig, matches: &ArgMatches, shutdown: CancellationToken) -> anyhow::Result<()> {
    let out = matches
        .get_one::<PathBuf>("out")
        .cloned()
        .context("--out is required")?;
    let seconds = *matches.get_one::<u64>("seconds").unwrap_or(&5);
    let fps = *matches.get_one::<u32>("fps").unwrap_or(&30);
    let width = *matches.get_one::<u32>("width").unwrap_or(&1280);
    let height = *matches.get_one::<u32>("height").unwrap_or(&720);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the runtime")?;

    let window = SyntheticWindow::new(1, width, height).with_fps(fps);
    let (mut service, mut events) = ScreencastService::new(config);
    let id = service.start_video_recording(
        &window,
        StartRecording {
            mode: RecordingMode::Video { path: out.clone() },
            width,
            height,
            viewport: None,
            top_offset: 0,
        },
    )?;
    info!("Recording {} for {}s", out.display(), seconds);

    runtime.block_on(async {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
            _ = shutdown.cancelled() => info!("Interrupted, finishing recording"),
        }
    });

    service.stop_video_recording(&id)?;
    runtime.block_on(async {
        while let Some(event) = events.recv().await {
            if event.is_stopped() && event.session_id == id {
                break;
            }
        }
    });
    info!("Recording saved to {}", service.config().resolve_output(&out).display());
    Ok(())
}
