//! Channel naming for dual-emission and alternating-excitation imaging.
//!
//! Every output channel is tagged with the fluorophore that was excited and
//! the fluorophore whose emission was captured. Single-letter tags `d`/`a`
//! stand for donor and acceptor.

use crate::{Error, Result};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Donor or acceptor, as used for excitation and emission tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Letter {
    Donor,
    Acceptor,
}

impl Letter {
    /// Single-character tag (`d` or `a`).
    #[must_use]
    pub fn as_char(self) -> char {
        match self {
            Self::Donor => 'd',
            Self::Acceptor => 'a',
        }
    }

    /// The other fluorophore.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Donor => Self::Acceptor,
            Self::Acceptor => Self::Donor,
        }
    }
}

impl fmt::Display for Letter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// A named output channel.
///
/// `Donor` and `Acceptor` come from single-channel and FRET imports. The
/// two-letter names come from ALEX imports and spell excitation then
/// emission, so `Da` is donor-excited acceptor emission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Channel {
    Donor,
    Acceptor,
    Dd,
    Da,
    Ad,
    Aa,
}

impl Channel {
    /// All channel names in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Donor,
        Self::Acceptor,
        Self::Dd,
        Self::Da,
        Self::Ad,
        Self::Aa,
    ];

    /// Build an ALEX channel name from its excitation and emission letters.
    #[must_use]
    pub fn from_letters(excitation: Letter, emission: Letter) -> Self {
        match (excitation, emission) {
            (Letter::Donor, Letter::Donor) => Self::Dd,
            (Letter::Donor, Letter::Acceptor) => Self::Da,
            (Letter::Acceptor, Letter::Donor) => Self::Ad,
            (Letter::Acceptor, Letter::Acceptor) => Self::Aa,
        }
    }

    /// Lower-case channel name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Donor => "donor",
            Self::Acceptor => "acceptor",
            Self::Dd => "dd",
            Self::Da => "da",
            Self::Ad => "ad",
            Self::Aa => "aa",
        }
    }

    /// Name shown to users: `Donor`/`Acceptor`, or upper-case ALEX names.
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Donor => "Donor",
            Self::Acceptor => "Acceptor",
            Self::Dd => "DD",
            Self::Da => "DA",
            Self::Ad => "AD",
            Self::Aa => "AA",
        }
    }

    /// Which laser excited this channel.
    ///
    /// In FRET imaging both channels are donor-excited.
    #[must_use]
    pub fn excitation(self) -> Letter {
        match self {
            Self::Donor | Self::Acceptor | Self::Da | Self::Dd => Letter::Donor,
            Self::Ad | Self::Aa => Letter::Acceptor,
        }
    }

    /// Which emission filter captured this channel.
    #[must_use]
    pub fn emission(self) -> Letter {
        match self {
            Self::Donor | Self::Ad | Self::Dd => Letter::Donor,
            Self::Acceptor | Self::Da | Self::Aa => Letter::Acceptor,
        }
    }

    /// Excitation letter followed by emission letter, e.g. `"da"`.
    #[must_use]
    pub fn channel_ref(self) -> String {
        format!("{}{}", self.excitation(), self.emission())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|channel| channel.name() == lower)
            .ok_or_else(|| Error::UnknownValue {
                kind: "channel",
                value: s.to_string(),
            })
    }
}

/// Left-to-right order of the two emission halves on the camera chip.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ChannelLayout {
    #[default]
    DonorAcceptor,
    AcceptorDonor,
}

impl ChannelLayout {
    /// Emission letters for the left and right halves of a raw frame.
    #[must_use]
    pub fn emission_order(self) -> [Letter; 2] {
        match self {
            Self::DonorAcceptor => [Letter::Donor, Letter::Acceptor],
            Self::AcceptorDonor => [Letter::Acceptor, Letter::Donor],
        }
    }

    /// FRET channel names for the left and right halves.
    #[must_use]
    pub fn fret_channels(self) -> [Channel; 2] {
        match self {
            Self::DonorAcceptor => [Channel::Donor, Channel::Acceptor],
            Self::AcceptorDonor => [Channel::Acceptor, Channel::Donor],
        }
    }

    /// ALEX channel names for the left and right halves of a frame taken
    /// under the given excitation.
    #[must_use]
    pub fn alex_channels(self, excitation: Letter) -> [Channel; 2] {
        self.emission_order()
            .map(|emission| Channel::from_letters(excitation, emission))
    }
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DonorAcceptor => f.write_str("donor-acceptor"),
            Self::AcceptorDonor => f.write_str("acceptor-donor"),
        }
    }
}

impl FromStr for ChannelLayout {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "donor-acceptor" => Ok(Self::DonorAcceptor),
            "acceptor-donor" => Ok(Self::AcceptorDonor),
            _ => Err(Error::UnknownValue {
                kind: "channel layout",
                value: s.to_string(),
            }),
        }
    }
}

/// Which laser illuminates the first frame of an ALEX acquisition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum AlexFirstFrame {
    #[default]
    Donor,
    Acceptor,
}

impl AlexFirstFrame {
    /// Excitation letter for a raw frame index; excitation alternates
    /// frame by frame starting from the configured laser.
    #[must_use]
    pub fn excitation_for(self, frame_index: usize) -> Letter {
        let first = match self {
            Self::Donor => Letter::Donor,
            Self::Acceptor => Letter::Acceptor,
        };
        if frame_index % 2 == 0 {
            first
        } else {
            first.other()
        }
    }
}

impl fmt::Display for AlexFirstFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Donor => f.write_str("donor"),
            Self::Acceptor => f.write_str("acceptor"),
        }
    }
}

impl FromStr for AlexFirstFrame {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "donor" => Ok(Self::Donor),
            "acceptor" => Ok(Self::Acceptor),
            _ => Err(Error::UnknownValue {
                kind: "ALEX first frame",
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_follow_lookup_table() {
        let expected = [
            (Channel::Donor, 'd', 'd'),
            (Channel::Acceptor, 'd', 'a'),
            (Channel::Dd, 'd', 'd'),
            (Channel::Da, 'd', 'a'),
            (Channel::Ad, 'a', 'd'),
            (Channel::Aa, 'a', 'a'),
        ];
        for (channel, ex, em) in expected {
            assert_eq!(channel.excitation().as_char(), ex, "{channel}");
            assert_eq!(channel.emission().as_char(), em, "{channel}");
        }
        assert_eq!(Channel::Acceptor.channel_ref(), "da");
    }

    #[test]
    fn alex_names_round_trip_through_letters() {
        for channel in [Channel::Dd, Channel::Da, Channel::Ad, Channel::Aa] {
            let rebuilt = Channel::from_letters(channel.excitation(), channel.emission());
            assert_eq!(rebuilt, channel);
        }
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("DA".parse::<Channel>().unwrap(), Channel::Da);
        assert_eq!(" Donor ".parse::<Channel>().unwrap(), Channel::Donor);
        assert_eq!(
            "Acceptor-Donor".parse::<ChannelLayout>().unwrap(),
            ChannelLayout::AcceptorDonor
        );
        assert!("dx".parse::<Channel>().is_err());
        assert!("left-right".parse::<ChannelLayout>().is_err());
    }

    #[test]
    fn display_names() {
        assert_eq!(Channel::Donor.display_name(), "Donor");
        assert_eq!(Channel::Ad.display_name(), "AD");
    }

    #[test]
    fn alex_excitation_alternates() {
        let donor_first = AlexFirstFrame::Donor;
        assert_eq!(donor_first.excitation_for(0), Letter::Donor);
        assert_eq!(donor_first.excitation_for(1), Letter::Acceptor);
        assert_eq!(donor_first.excitation_for(2), Letter::Donor);

        let acceptor_first = AlexFirstFrame::Acceptor;
        assert_eq!(acceptor_first.excitation_for(0), Letter::Acceptor);
        assert_eq!(acceptor_first.excitation_for(1), Letter::Donor);
    }

    #[test]
    fn layout_orders_emission_halves() {
        assert_eq!(
            ChannelLayout::AcceptorDonor.alex_channels(Letter::Donor),
            [Channel::Da, Channel::Dd]
        );
        assert_eq!(
            ChannelLayout::DonorAcceptor.fret_channels(),
            [Channel::Donor, Channel::Acceptor]
        );
    }
}
