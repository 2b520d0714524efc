//! Static device configuration: which TECs exist and where they live.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// Maps a logical TEC number onto a board and channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TecConfig {
    #[serde(rename = "id")]
    pub tec_no: u32,
    #[serde(rename = "board")]
    pub board_no: u8,
    #[serde(rename = "channel")]
    pub channel_no: u8,
}

/// Whether this board faces the network or sits behind the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardRole {
    #[default]
    Controller,
    Peripheral,
}

/// The TEC list in configuration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TecMap {
    entries: Vec<TecConfig>,
}

impl TecMap {
    pub fn new(entries: Vec<TecConfig>) -> Self {
        Self { entries }
    }

    /// Looks up a TEC by its logical number.
    pub fn lookup(&self, tec_no: u32) -> Option<&TecConfig> {
        self.entries.iter().find(|t| t.tec_no == tec_no)
    }

    /// TECs mounted on `board`, in configuration order.
    pub fn on_board(&self, board: u8) -> impl Iterator<Item = &TecConfig> + '_ {
        self.entries.iter().filter(move |t| t.board_no == board)
    }

    /// Lowest board number in the list; the controller's board by convention.
    pub fn lowest_board(&self) -> Option<u8> {
        self.entries.iter().map(|t| t.board_no).min()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TecConfig> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a TecMap {
    type Item = &'a TecConfig;
    type IntoIter = std::slice::Iter<'a, TecConfig>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Device-wide configuration, read-only after boot.
#[derive(Debug, Clone, PartialEq)]
pub struct TecControllerConfig {
    pub box_no: u32,
    /// This board's number.
    pub board_no: u8,
    pub role: BoardRole,
    pub ip: Ipv4Addr,
    pub port: u16,
    pub board_count: u8,
    pub channels_per_board: u8,
    pub tecs: TecMap,
}

impl TecControllerConfig {
    pub fn is_controller(&self) -> bool {
        self.role == BoardRole::Controller
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tec(tec_no: u32, board_no: u8, channel_no: u8) -> TecConfig {
        TecConfig {
            tec_no,
            board_no,
            channel_no,
        }
    }

    #[test]
    fn test_lookup_finds_tec_by_number() {
        let map = TecMap::new(vec![tec(1, 1, 0), tec(3, 2, 4)]);
        assert_eq!(map.lookup(3), Some(&tec(3, 2, 4)));
        assert_eq!(map.lookup(2), None);
    }

    #[test]
    fn test_lowest_board_ignores_list_order() {
        let map = TecMap::new(vec![tec(1, 3, 0), tec(2, 1, 0), tec(3, 2, 0)]);
        assert_eq!(map.lowest_board(), Some(1));
        assert_eq!(TecMap::default().lowest_board(), None);
    }

    #[test]
    fn test_on_board_keeps_configuration_order() {
        let map = TecMap::new(vec![tec(7, 2, 3), tec(1, 1, 0), tec(4, 2, 1)]);
        let ids: Vec<u32> = map.on_board(2).map(|t| t.tec_no).collect();
        assert_eq!(ids, vec![7, 4]);
    }
}
