//! Device models and mixer channel mapping.

use tracing::debug;

/// Audient USB vendor id.
pub const AUDIENT_VID: u16 = 0x2708;

/// Number of stereo mixes per input for known models.
///
/// 1 = main mix, 2 = main mix + cue, 3 = main mix + cue A + cue B.
const MIX_WIDTHS: &[(u64, u8)] = &[
    (0x01_0000_2708, 3), // iD22 mk1
    (0x02_0000_2708, 3), // iD14 mk1
    (0x03_0000_2708, 1), // iD4 mk1
    (0x04_0000_2708, 2), // Sono
    (0x05_0000_2708, 3), // iD44 mk1
    (0x06_0000_2708, 1), // EVO4
    (0x07_0000_2708, 2), // EVO8
    (0x09_0000_2708, 1), // iD4 mk2
    (0x08_0000_2708, 3), // iD14 mk2
    (0x0A_0000_2708, 5), // EVO16
    (0x0B_0000_2708, 5), // iD44 mk2
    (0x0D_0000_2708, 3), // iD24 mk2
    (0x0E_0000_2708, 1), // ORIA
    (0x0F_0000_2708, 1), // iD4 Stream OTG
    (0x10_0000_2708, 3), // iD14 Stream OTG
];

/// Mixer width of a device model, 1 for models not in the table.
#[must_use]
pub fn mixer_width(model: u64) -> u8 {
    MIX_WIDTHS
        .iter()
        .find(|(known, _)| *known == model)
        .map_or(1, |(_, width)| *width)
}

/// Mixer control index of an input's left gain; the right gain follows it.
///
/// Returns `None` when the index does not fit the one-byte control field.
#[must_use]
pub fn control_index(model: u64, channel: u8) -> Option<u8> {
    let index = u32::from(channel) * u32::from(mixer_width(model)) * 2;
    let left = u8::try_from(index).ok().filter(|left| *left < u8::MAX);
    if left.is_none() {
        debug!(
            model = format_args!("{model:#012x}"),
            channel,
            "Channel outside the mixer control range"
        );
    }
    left
}

/// A stereo gain pair in 1/256 dB, as stored by the mixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VolPair {
    pub left: i16,
    pub right: i16,
}

impl VolPair {
    /// The mixer's -inf dB value on both sides.
    pub const MUTED: Self = Self { left: i16::MIN, right: i16::MIN };

    #[must_use]
    pub fn is_muted(self) -> bool {
        self == Self::MUTED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_model_widths() {
        assert_eq!(mixer_width(0x08_0000_2708), 3);
        assert_eq!(mixer_width(0x0A_0000_2708), 5);
        assert_eq!(mixer_width(0x04_0000_2708), 2);
        assert_eq!(mixer_width(0x06_0000_2708), 1);
    }

    #[test]
    fn test_unknown_model_defaults_to_one() {
        assert_eq!(mixer_width(0), 1);
        assert_eq!(mixer_width(0x0C_0000_2708), 1);
        assert_eq!(control_index(0x0C_0000_2708, 5), Some(10));
    }

    #[test]
    fn test_id14_mapping() {
        let id14 = 0x08_0000_2708;
        assert_eq!(control_index(id14, 0), Some(0));
        assert_eq!(control_index(id14, 1), Some(6));
        assert_eq!(control_index(id14, 3), Some(18));
    }

    #[test]
    fn test_out_of_range_channel() {
        // 50 * 3 * 2 = 300 does not fit.
        assert_eq!(control_index(0x08_0000_2708, 50), None);
    }

    #[test]
    fn test_muted_sentinel() {
        assert!(VolPair::MUTED.is_muted());
        assert!(!VolPair::default().is_muted());
        assert!(!VolPair { left: i16::MIN, right: 0 }.is_muted());
    }

    proptest! {
        #[test]
        fn prop_control_index_is_channel_times_width_times_two(
            entry in prop::sample::select(MIX_WIDTHS.to_vec()),
            channel in 0u8..20,
        ) {
            let (model, width) = entry;
            let expected = u32::from(channel) * u32::from(width) * 2;
            match control_index(model, channel) {
                Some(left) => prop_assert_eq!(u32::from(left), expected),
                None => prop_assert!(expected >= 255),
            }
        }

        #[test]
        fn prop_unknown_models_have_width_one(model in any::<u64>(), channel in 0u8..127) {
            prop_assume!(MIX_WIDTHS.iter().all(|(known, _)| *known != model));
            prop_assert_eq!(control_index(model, channel), Some(channel * 2));
        }
    }
}
