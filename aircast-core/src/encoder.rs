use crate::config::EncoderSection;

/// Everything the encoder needs to know about one outgoing stream.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub stream_id: String,
    pub media_path: String,
    /// Optional looped audio bed mixed over the video track.
    pub audio_path: Option<String>,
    pub destination: String,
    /// Planned duration in seconds. `None` or zero means open-ended.
    pub duration_s: Option<i64>,
    pub loop_video: bool,
}

/// Builds the ffmpeg argument list for a stream request.
///
/// The list is ordered the way ffmpeg expects: global flags, inputs,
/// mapping and codecs, then the output format and destination last.
pub fn stream_args(request: &StreamRequest, encoder: &EncoderSection) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    args.push("-hide_banner".to_string());
    args.push("-loglevel".to_string());
    args.push(encoder.log_level.clone());
    args.push("-re".to_string());

    if request.loop_video {
        args.push("-stream_loop".to_string());
        args.push("-1".to_string());
    }
    args.push("-i".to_string());
    args.push(request.media_path.clone());

    if let Some(audio) = &request.audio_path {
        args.push("-stream_loop".to_string());
        args.push("-1".to_string());
        args.push("-i".to_string());
        args.push(audio.clone());
        args.push("-map".to_string());
        args.push("0:v:0".to_string());
        args.push("-map".to_string());
        args.push("1:a:0".to_string());
        args.push("-c:v".to_string());
        args.push("copy".to_string());
        args.push("-c:a".to_string());
        args.push("aac".to_string());
        args.push("-ar".to_string());
        args.push(encoder.audio_sample_rate.to_string());
        args.push("-b:a".to_string());
        args.push(encoder.audio_bitrate.clone());
    } else {
        args.push("-c".to_string());
        args.push("copy".to_string());
    }

    args.push("-f".to_string());
    args.push("flv".to_string());

    if let Some(duration) = request.duration_s.filter(|d| *d > 0) {
        args.push("-t".to_string());
        args.push(duration.to_string());
    }

    args.push(request.destination.clone());
    args
}
