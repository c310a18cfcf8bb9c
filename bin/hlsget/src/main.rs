mod picker;

use std::path::{Path, PathBuf};

use clap::error::ErrorKind;
use clap::Parser;
use hlsget::{m3u8, merge, util, Downloader, PathUrl, Playlist};

/// Download an HLS presentation described by an m3u8 playlist and
/// concatenate its segments into a single file with ffmpeg.
#[derive(Parser, Debug)]
#[command(name = "hlsget", version)]
struct Args {
    /// Debug output
    #[arg(short, long)]
    verbose: bool,

    /// Base name of the segment files and the final <NAME>.mp4
    #[arg(short, long)]
    name: String,

    /// URL of the m3u8 playlist
    url: String,
}

const EXIT_OK: i32 = 0;
const EXIT_ARGUMENTS: i32 = -1;
const EXIT_NO_FFMPEG: i32 = -2;
const EXIT_FILESYSTEM: i32 = -3;
const EXIT_DOWNLOAD: i32 = -4;
const EXIT_NOT_M3U8: i32 = -5;

#[tokio::main]
async fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = err.print();
            std::process::exit(EXIT_OK);
        }
        Err(err) => {
            let _ = err.print();
            std::process::exit(EXIT_ARGUMENTS);
        }
    };

    pretty_env_logger::formatted_builder()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    std::process::exit(run(args).await);
}

async fn run(args: Args) -> i32 {
    if !merge::ffmpeg_available().await {
        eprintln!("Error: ffmpeg was not found, please install it first!");
        return EXIT_NO_FFMPEG;
    }

    let mut downloader = Downloader::new();
    downloader.set_verbose(args.verbose);

    let playlist = match load_playlist(&downloader, &args.url).await {
        Ok(playlist) => playlist,
        Err(code) => return code,
    };

    let media = if playlist.is_master {
        let Some(index) = picker::pick_variant(&playlist.urls) else {
            log::info!("Cancelled.");
            return EXIT_OK;
        };
        let variant_url = playlist.urls[index].url.clone();
        match load_playlist(&downloader, &variant_url).await {
            Ok(variant) => variant,
            Err(code) => return code,
        }
    } else {
        playlist
    };

    if media.urls.is_empty() {
        eprintln!("Error: The playlist `{}' contains no segments!", args.url);
        return EXIT_NOT_M3U8;
    }

    let count = media.urls.len();
    let width = util::count_digits(count);
    let jobs: Vec<PathUrl> = media
        .urls
        .iter()
        .enumerate()
        .map(|(i, entry)| PathUrl {
            path: PathBuf::from(format!("{}-{:0width$}-v1-a1.ts", args.name, i + 1)),
            url: entry.url.clone(),
        })
        .collect();

    log::info!("Downloading {count} segments.");
    downloader.set_progress(true);
    let results = downloader.fetch_many(jobs).await;

    if !results.errors.is_empty() {
        for error in &results.errors {
            eprintln!("{error}");
        }
        return EXIT_DOWNLOAD;
    }

    let list_path = PathBuf::from(format!("{}-filelist.txt", args.name));
    let output = PathBuf::from(format!("{}.mp4", args.name));
    let status = match merge::concat_segments(&results.succeeded, &list_path, &output).await {
        Ok(status) => status,
        Err(err) => {
            eprintln!("Error: {err}!");
            return EXIT_FILESYSTEM;
        }
    };

    cleanup(&list_path, &results.succeeded).await;

    if !status.success() {
        return status.code().unwrap_or(EXIT_DOWNLOAD);
    }

    log::info!("Finished, the result is at {}", output.display());
    EXIT_OK
}

/// Fetch and parse one playlist, rebasing relative urls against the
/// scheme+authority of the playlist url. Errors are already reported
/// to the user; only the exit code comes back.
async fn load_playlist(downloader: &Downloader, url: &str) -> Result<Playlist, i32> {
    let buffer = match downloader.fetch_to_buffer(url).await {
        Ok(buffer) => buffer,
        Err(err) => {
            eprintln!("Error: {err}!");
            return Err(EXIT_DOWNLOAD);
        }
    };

    if !m3u8::is_m3u8(&buffer) {
        eprintln!("Error: `{url}' is not an m3u8 playlist!");
        return Err(EXIT_NOT_M3U8);
    }

    let mut playlist = Playlist::from_buffer(&buffer);
    if let Some(err) = playlist.error.take() {
        eprintln!("Error: {err}!");
        return Err(EXIT_NOT_M3U8);
    }

    if playlist.contains_relative_urls() {
        let base = m3u8::base_url(url);
        if base.is_empty() {
            eprintln!("Error: No base url can be derived from `{url}'!");
            return Err(EXIT_NOT_M3U8);
        }
        playlist.set_base_url(&base);
    }

    Ok(playlist)
}

async fn cleanup(list_path: &Path, segments: &[PathBuf]) {
    if let Err(err) = tokio::fs::remove_file(list_path).await {
        log::warn!("Could not remove {}: {err}", list_path.display());
    }
    for segment in segments {
        if let Err(err) = tokio::fs::remove_file(segment).await {
            log::warn!("Could not remove {}: {err}", segment.display());
        }
    }
}
