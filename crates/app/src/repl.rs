//! Line commands for a running session.

use std::fmt::Write as _;

use beatgrid_core::{PlaybackState, SampleId, SessionEvent, SessionHandle, SessionSnapshot, TrackId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

pub const HELP: &str = "\
commands:
  play | pause | stop
  tempo BPM            set tempo (1-999)
  steps N              pattern length (16, 32 or 64)
  toggle TRACK STEP    flip a step (steps count from 0)
  volume TRACK 0-100
  pan TRACK 0-100      50 is center
  mute TRACK | solo TRACK   toggle
  master 0-100
  add [NAME] | remove TRACK
  fx TRACK NAME 0-100   e.g. fx 1 reverb 30
  name TRACK NAME      rename a track
  rename NAME          rename the project
  bind TRACK SAMPLE|none
  preview SAMPLE
  reload               re-read the sample library
  status | help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Pause,
    Stop,
    Tempo(u32),
    Steps(usize),
    Toggle(TrackId, usize),
    Volume(TrackId, u8),
    Pan(TrackId, u8),
    Mute(TrackId),
    Solo(TrackId),
    Master(u8),
    Add(Option<String>),
    Remove(TrackId),
    Effect(TrackId, String, f32),
    NameTrack(TrackId, String),
    Rename(String),
    Bind(TrackId, Option<SampleId>),
    Preview(SampleId),
    Reload,
    Status,
    Help,
    Quit,
}

/// Parse one input line. Blank lines give `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let command = match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("play" | "start", []) => Command::Play,
        ("pause", []) => Command::Pause,
        ("stop", []) => Command::Stop,
        ("tempo" | "bpm", [bpm]) => Command::Tempo(number(bpm)?),
        ("steps", [steps]) => Command::Steps(number(steps)?),
        ("toggle", [track, step]) => Command::Toggle(track_id(track)?, number(step)?),
        ("volume" | "vol", [track, value]) => Command::Volume(track_id(track)?, number(value)?),
        ("pan", [track, value]) => Command::Pan(track_id(track)?, number(value)?),
        ("mute", [track]) => Command::Mute(track_id(track)?),
        ("solo", [track]) => Command::Solo(track_id(track)?),
        ("master", [value]) => Command::Master(number(value)?),
        ("add", []) => Command::Add(None),
        ("add", name) => Command::Add(Some(name.join(" "))),
        ("remove" | "rm", [track]) => Command::Remove(track_id(track)?),
        ("fx", [track, name, value]) => {
            Command::Effect(track_id(track)?, name.to_ascii_lowercase(), level(value)?)
        }
        ("name", [track, _, ..]) => Command::NameTrack(track_id(track)?, args[1..].join(" ")),
        ("rename", [_, ..]) => Command::Rename(args.join(" ")),
        ("bind", [track, "none"]) => Command::Bind(track_id(track)?, None),
        ("bind", [track, sample]) => Command::Bind(track_id(track)?, Some(SampleId(number(sample)?))),
        ("preview", [sample]) => Command::Preview(SampleId(number(sample)?)),
        ("reload", []) => Command::Reload,
        ("status" | "ls", []) => Command::Status,
        ("help" | "?", []) => Command::Help,
        ("quit" | "exit" | "q", []) => Command::Quit,
        (verb, _) => return Err(format!("can't parse '{verb}' with {} argument(s), try 'help'", args.len())),
    };
    Ok(Some(command))
}

fn number<T: std::str::FromStr>(word: &str) -> Result<T, String> {
    word.parse().map_err(|_| format!("'{word}' is not a valid number"))
}

fn level(word: &str) -> Result<f32, String> {
    let value: f32 = number(word)?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("'{word}' is not a valid number"))
    }
}

fn track_id(word: &str) -> Result<TrackId, String> {
    number(word).map(TrackId)
}

/// Read commands from stdin until `quit` or end of input.
pub async fn run(handle: SessionHandle) -> anyhow::Result<()> {
    println!("{}", status(&handle.snapshot().await?));
    println!("type 'help' for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        if let Err(err) = execute(&handle, command).await {
            println!("error: {err:#}");
        }
        for event in handle.take_events().await? {
            let SessionEvent::PersistenceFailed { target, message } = event;
            warn!(target = %target, "Change not saved");
            println!("warning: {target} was not saved ({message})");
        }
    }
    Ok(())
}

async fn execute(handle: &SessionHandle, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Play => {
            handle.start().await?;
        }
        Command::Pause => {
            handle.pause().await?;
        }
        Command::Stop => handle.stop().await?,
        Command::Tempo(bpm) => handle.set_tempo(bpm).await?,
        Command::Steps(steps) => handle.set_step_count(steps).await?,
        Command::Toggle(track, step) => match handle.toggle_step(track, step).await? {
            Some(on) => println!("track {track} step {step} {}", if on { "on" } else { "off" }),
            None => println!("no track {track}"),
        },
        Command::Volume(track, volume) => found(track, handle.set_volume(track, volume).await?),
        Command::Pan(track, pan) => found(track, handle.set_pan(track, pan).await?),
        Command::Mute(track) => {
            let muted = track_flag(handle, track, |t| t.muted).await?;
            found(track, handle.set_mute(track, !muted).await?);
        }
        Command::Solo(track) => {
            let soloed = track_flag(handle, track, |t| t.soloed).await?;
            found(track, handle.set_solo(track, !soloed).await?);
        }
        Command::Master(volume) => handle.set_master_volume(volume).await?,
        Command::Add(name) => {
            let id = handle.add_track(name).await?;
            println!("added track {id}");
        }
        Command::Remove(track) => found(track, handle.remove_track(track).await?),
        Command::Effect(track, name, value) => {
            found(track, handle.set_effect(track, name, value).await?)
        }
        Command::NameTrack(track, name) => found(track, handle.rename_track(track, name).await?),
        Command::Rename(name) => handle.rename(name).await?,
        Command::Bind(track, sample) => found(track, handle.bind_sample(track, sample).await?),
        Command::Preview(sample) => {
            // runs on its own task; load failures are logged there
            handle.preview(sample).await?;
        }
        Command::Reload => {
            let count = handle.reload_library().await?;
            println!("{count} sample(s) in the library");
        }
        Command::Status => println!("{}", status(&handle.snapshot().await?)),
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
    Ok(())
}

async fn track_flag(
    handle: &SessionHandle,
    track: TrackId,
    flag: fn(&beatgrid_core::TrackSnapshot) -> bool,
) -> anyhow::Result<bool> {
    let snapshot = handle.snapshot().await?;
    Ok(snapshot
        .tracks
        .iter()
        .find(|t| t.id == track.0)
        .is_some_and(flag))
}

fn found(track: TrackId, found: bool) {
    if !found {
        println!("no track {track}");
    }
}

/// Render a snapshot as a small text grid.
pub fn status(snapshot: &SessionSnapshot) -> String {
    let state = match snapshot.playback_state {
        PlaybackState::Stopped => "stopped",
        PlaybackState::Playing => "playing",
        PlaybackState::Paused => "paused",
    };
    let mut out = format!(
        "{} | {} BPM | {} | step {}/{} ({}) | master {}",
        snapshot.name,
        snapshot.tempo,
        state,
        snapshot.current_step,
        snapshot.step_count,
        snapshot.position,
        snapshot.master_volume,
    );
    for track in &snapshot.tracks {
        let flags = match (track.muted, track.soloed) {
            (true, true) => "MS",
            (true, false) => "M ",
            (false, true) => " S",
            (false, false) => "  ",
        };
        let _ = write!(
            out,
            "\n{:>3} {:<12} {} vol {:>3} pan {:>3} {} {}",
            track.id,
            track.name,
            track.pattern(),
            track.volume,
            track.pan,
            flags,
            track.sample_name.as_deref().unwrap_or("-"),
        );
    }
    out
}
