//! Inbound video track selection (§4.2): at most one track is forwarded,
//! preferring a screen-share stream over a camera.

const SCREEN_STREAM_IDS: [&str; 3] = ["screen", "display", "screenshare"];

/// True if `stream_id` names a screen-share stream rather than a camera.
pub fn is_screen_share(stream_id: &str) -> bool {
    SCREEN_STREAM_IDS
        .iter()
        .any(|candidate| stream_id.eq_ignore_ascii_case(candidate))
}

/// Picks the track to forward out of all currently-known inbound video
/// tracks, given as `(stream_id, mime_type)` pairs in discovery order.
/// Returns the index of the winner, preferring the first screen-share
/// track found and otherwise the first track seen.
pub fn select_video_track(tracks: &[(String, String)]) -> Option<usize> {
    if tracks.is_empty() {
        return None;
    }
    tracks
        .iter()
        .position(|(stream_id, _)| is_screen_share(stream_id))
        .or(Some(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_screen_share_ids_case_insensitively() {
        assert!(is_screen_share("screen"));
        assert!(is_screen_share("Display"));
        assert!(is_screen_share("SCREENSHARE"));
        assert!(!is_screen_share("camera"));
    }

    #[test]
    fn prefers_screen_share_over_camera() {
        let tracks = vec![
            ("camera".to_string(), "video/VP8".to_string()),
            ("screen".to_string(), "video/VP8".to_string()),
        ];
        assert_eq!(select_video_track(&tracks), Some(1));
    }

    #[test]
    fn falls_back_to_first_track_when_no_screen_share() {
        let tracks = vec![
            ("camera1".to_string(), "video/VP8".to_string()),
            ("camera2".to_string(), "video/VP8".to_string()),
        ];
        assert_eq!(select_video_track(&tracks), Some(0));
    }

    #[test]
    fn none_when_no_tracks() {
        assert_eq!(select_video_track(&[]), None);
    }
}
