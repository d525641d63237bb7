// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! SETTINGS frame parsing, validation, and the peer-settings snapshot the
//! connection engine keeps (RFC 9113 Section 6.5).
//!
//! Grounded on the teacher's `Settings`/`SettingKind` pair in
//! `src/http/v2.rs`, which already enumerates the six IANA-registered
//! identifiers; this adds the validation rules the teacher's server role
//! never needed to apply to its own outbound SETTINGS (a client must reject
//! a peer's bad `ENABLE_PUSH` or `INITIAL_WINDOW_SIZE` value).

use bytes::{Buf, Bytes};

use crate::error::{ProtocolError, Reason};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u16)]
pub enum SettingKind {
    HeaderTableSize = 0x1,
    EnablePush = 0x2,
    MaxConcurrentStreams = 0x3,
    InitialWindowSize = 0x4,
    MaxFrameSize = 0x5,
    MaxHeaderListSize = 0x6,
}

impl SettingKind {
    fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0x1 => Self::HeaderTableSize,
            0x2 => Self::EnablePush,
            0x3 => Self::MaxConcurrentStreams,
            0x4 => Self::InitialWindowSize,
            0x5 => Self::MaxFrameSize,
            0x6 => Self::MaxHeaderListSize,
            _ => return None,
        })
    }
}

/// The peer's (or our own) negotiated settings. Fields default to the RFC
/// 9113 Section 6.5.2 initial values, which apply until the first SETTINGS
/// frame of a connection changes them.
#[derive(Copy, Clone, Debug)]
pub struct PeerSettings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: u32,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: u32,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            header_table_size: 4096,
            enable_push: true,
            max_concurrent_streams: u32::MAX,
            initial_window_size: 65_535,
            max_frame_size: 16384,
            max_header_list_size: u32::MAX,
        }
    }
}

/// One (identifier, value) pair as it appears on the wire. Unknown
/// identifiers parse fine and are discarded by the caller (RFC 9113
/// Section 6.5.2: "An endpoint that receives a SETTINGS frame with any
/// unknown or unsupported identifier MUST ignore that setting").
#[derive(Copy, Clone, Debug)]
pub struct RawSetting {
    pub kind: Option<SettingKind>,
    pub value: u32,
}

/// Parses a SETTINGS frame payload into its (identifier, value) pairs.
/// The payload length must be a multiple of 6 octets (RFC 9113 Section 6.5).
pub fn parse_settings_payload(mut payload: Bytes) -> Result<Vec<RawSetting>, ProtocolError> {
    if payload.len() % 6 != 0 {
        return Err(ProtocolError::new(Reason::FrameSizeError, "SETTINGS payload length not a multiple of 6"));
    }
    let mut settings = Vec::with_capacity(payload.len() / 6);
    while payload.has_remaining() {
        let id = payload.get_u16();
        let value = payload.get_u32();
        settings.push(RawSetting { kind: SettingKind::from_u16(id), value });
    }
    Ok(settings)
}

impl PeerSettings {
    /// Applies one parsed setting, validating it per RFC 9113 Section 6.5.2.
    /// Unknown identifiers are silently ignored by the caller before this is
    /// reached; this only validates identifiers we recognize.
    pub fn apply(&mut self, setting: RawSetting) -> Result<(), ProtocolError> {
        let Some(kind) = setting.kind else { return Ok(()) };
        match kind {
            SettingKind::HeaderTableSize => {
                self.header_table_size = setting.value;
            }
            SettingKind::EnablePush => {
                if setting.value > 1 {
                    return Err(ProtocolError::new(Reason::ProtocolError, "SETTINGS_ENABLE_PUSH must be 0 or 1"));
                }
                self.enable_push = setting.value == 1;
            }
            SettingKind::MaxConcurrentStreams => {
                self.max_concurrent_streams = setting.value;
            }
            SettingKind::InitialWindowSize => {
                if setting.value > 0x7FFF_FFFF {
                    return Err(ProtocolError::new(Reason::FlowControlError, "SETTINGS_INITIAL_WINDOW_SIZE exceeds 2^31-1"));
                }
                self.initial_window_size = setting.value;
            }
            SettingKind::MaxFrameSize => {
                if !(16384..=16_777_215).contains(&setting.value) {
                    return Err(ProtocolError::new(Reason::ProtocolError, "SETTINGS_MAX_FRAME_SIZE out of range"));
                }
                self.max_frame_size = setting.value;
            }
            SettingKind::MaxHeaderListSize => {
                self.max_header_list_size = setting.value;
            }
        }
        Ok(())
    }
}

/// Serializes our local settings (the config's values) as a SETTINGS frame
/// payload, omitting any setting equal to the RFC default only when the
/// teacher's style of being explicit isn't required; here we send all of
/// them so the peer's log of "what changed" is unambiguous.
pub fn encode_settings_payload(settings: &[(SettingKind, u32)]) -> Bytes {
    let mut buf = bytes::BytesMut::with_capacity(settings.len() * 6);
    for (kind, value) in settings {
        buf.extend_from_slice(&(*kind as u16).to_be_bytes());
        buf.extend_from_slice(&value.to_be_bytes());
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_settings() {
        let mut payload = bytes::BytesMut::new();
        payload.extend_from_slice(&0x4u16.to_be_bytes());
        payload.extend_from_slice(&1_048_576u32.to_be_bytes());
        payload.extend_from_slice(&0xFFu16.to_be_bytes());
        payload.extend_from_slice(&42u32.to_be_bytes());

        let parsed = parse_settings_payload(payload.freeze()).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].kind, Some(SettingKind::InitialWindowSize));
        assert_eq!(parsed[1].kind, None);
    }

    #[test]
    fn rejects_misaligned_payload() {
        let payload = Bytes::from_static(&[0, 0, 0]);
        assert!(parse_settings_payload(payload).is_err());
    }

    #[test]
    fn rejects_enable_push_out_of_range() {
        let mut settings = PeerSettings::default();
        let err = settings.apply(RawSetting { kind: Some(SettingKind::EnablePush), value: 2 }).unwrap_err();
        assert_eq!(err.reason, Reason::ProtocolError);
    }

    #[test]
    fn rejects_initial_window_size_over_max() {
        let mut settings = PeerSettings::default();
        let err = settings.apply(RawSetting { kind: Some(SettingKind::InitialWindowSize), value: 0x8000_0000 }).unwrap_err();
        assert_eq!(err.reason, Reason::FlowControlError);
    }

    #[test]
    fn unknown_identifier_is_ignored() {
        let mut settings = PeerSettings::default();
        settings.apply(RawSetting { kind: None, value: 999 }).unwrap();
    }
}
