use super::Record;

/// Direction of a record as seen from one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    /// `None` when the device is neither end of the frame.
    pub fn from_mac(record: &Record, own_mac: &str) -> Option<Self> {
        if record.eth_src == own_mac {
            Some(Direction::Outgoing)
        } else if record.eth_dst == own_mac {
            Some(Direction::Incoming)
        } else {
            None
        }
    }

    pub fn is_incoming(&self) -> bool {
        matches!(self, Direction::Incoming)
    }

    pub fn is_outgoing(&self) -> bool {
        matches!(self, Direction::Outgoing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::packet::columns::*;
    use crate::listener::packet::record::tests::row;

    #[test]
    fn test_direction_from_mac() {
        let line = row(&[
            (TIME, "1"),
            (ETH_SRC, "00:00:00:00:00:01"),
            (ETH_DST, "00:00:00:00:00:02"),
            (FRAME_LEN, "60"),
        ]);
        let record = Record::from_line(&line).unwrap();

        assert_eq!(
            Direction::from_mac(&record, "00:00:00:00:00:01"),
            Some(Direction::Outgoing)
        );
        assert_eq!(
            Direction::from_mac(&record, "00:00:00:00:00:02"),
            Some(Direction::Incoming)
        );
        assert_eq!(Direction::from_mac(&record, "00:00:00:00:00:03"), None);
        assert!(Direction::Outgoing.is_outgoing());
        assert!(Direction::Incoming.is_incoming());
    }
}
