//! Encoder Profiles
//!
//! The two fixed H.264 encoding profiles, selected once per job by the
//! hardware-capability probe.

use serde::{Deserialize, Serialize};

/// Encoder family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderFamily {
    /// NVIDIA NVENC
    Nvenc,
    /// libx264
    Software,
}

impl EncoderFamily {
    /// FFmpeg encoder name for H.264
    pub fn h264_encoder(&self) -> &'static str {
        match self {
            EncoderFamily::Nvenc => "h264_nvenc",
            EncoderFamily::Software => "libx264",
        }
    }
}

/// Rate-control tuning only the hardware profile carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateControl {
    pub mode: String,
    pub lookahead: u32,
    pub spatial_aq: bool,
    pub aq_strength: u32,
}

/// Complete encoder parameter set handed to the render engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderProfile {
    pub family: EncoderFamily,
    pub codec: String,
    pub quality: String,
    pub pixel_format: String,
    pub preset: String,
    pub crf: u32,
    pub bitrate: String,
    pub max_rate: String,
    pub buffer_size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_control: Option<RateControl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Flattened ffmpeg argument list
    pub ffmpeg_params: Vec<String>,
}

impl EncoderProfile {
    /// Picks the profile for the probed capability.
    pub fn select(hardware_accelerated: bool) -> Self {
        if hardware_accelerated {
            Self::hardware()
        } else {
            Self::software()
        }
    }

    pub fn hardware() -> Self {
        let mut profile = Self {
            family: EncoderFamily::Nvenc,
            codec: EncoderFamily::Nvenc.h264_encoder().to_string(),
            quality: "high".to_string(),
            pixel_format: "yuv420p".to_string(),
            preset: "fast".to_string(),
            crf: 18,
            bitrate: "10M".to_string(),
            max_rate: "15M".to_string(),
            buffer_size: "20M".to_string(),
            rate_control: Some(RateControl {
                mode: "vbr".to_string(),
                lookahead: 20,
                spatial_aq: true,
                aq_strength: 8,
            }),
            profile: None,
            level: None,
            ffmpeg_params: Vec::new(),
        };
        profile.ffmpeg_params = profile.build_args();
        profile
    }

    pub fn software() -> Self {
        let mut profile = Self {
            family: EncoderFamily::Software,
            codec: EncoderFamily::Software.h264_encoder().to_string(),
            quality: "medium".to_string(),
            pixel_format: "yuv420p".to_string(),
            preset: "medium".to_string(),
            crf: 23,
            bitrate: "5M".to_string(),
            max_rate: "8M".to_string(),
            buffer_size: "10M".to_string(),
            rate_control: None,
            profile: Some("high".to_string()),
            level: Some("4.0".to_string()),
            ffmpeg_params: Vec::new(),
        };
        profile.ffmpeg_params = profile.build_args();
        profile
    }

    pub fn is_hardware(&self) -> bool {
        self.family == EncoderFamily::Nvenc
    }

    fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "-c:v",
            self.codec.as_str(),
            "-preset",
            self.preset.as_str(),
            "-crf",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(self.crf.to_string());
        for (flag, value) in [
            ("-b:v", &self.bitrate),
            ("-maxrate", &self.max_rate),
            ("-bufsize", &self.buffer_size),
        ] {
            args.push(flag.to_string());
            args.push(value.clone());
        }

        if let Some(rc) = &self.rate_control {
            args.push("-rc:v".to_string());
            args.push(rc.mode.clone());
            args.push("-rc-lookahead".to_string());
            args.push(rc.lookahead.to_string());
            args.push("-spatial_aq".to_string());
            args.push(if rc.spatial_aq { "1" } else { "0" }.to_string());
            args.push("-aq-strength".to_string());
            args.push(rc.aq_strength.to_string());
        }
        if let Some(profile) = &self.profile {
            args.push("-profile:v".to_string());
            args.push(profile.clone());
        }
        if let Some(level) = &self.level {
            args.push("-level".to_string());
            args.push(level.clone());
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_by_capability() {
        assert!(EncoderProfile::select(true).is_hardware());
        assert!(!EncoderProfile::select(false).is_hardware());
    }

    #[test]
    fn test_hardware_profile_args() {
        let profile = EncoderProfile::hardware();
        assert_eq!(profile.codec, "h264_nvenc");
        assert_eq!(profile.quality, "high");
        assert_eq!(
            profile.ffmpeg_params,
            vec![
                "-c:v", "h264_nvenc", "-preset", "fast", "-crf", "18", "-b:v", "10M",
                "-maxrate", "15M", "-bufsize", "20M", "-rc:v", "vbr", "-rc-lookahead", "20",
                "-spatial_aq", "1", "-aq-strength", "8",
            ]
        );
    }

    #[test]
    fn test_software_profile_args() {
        let profile = EncoderProfile::software();
        assert_eq!(profile.codec, "libx264");
        assert_eq!(profile.pixel_format, "yuv420p");
        assert_eq!(
            profile.ffmpeg_params,
            vec![
                "-c:v", "libx264", "-preset", "medium", "-crf", "23", "-b:v", "5M",
                "-maxrate", "8M", "-bufsize", "10M", "-profile:v", "high", "-level", "4.0",
            ]
        );
    }
}
