//! Frame layout of the bulb protocol. Every frame ends with the low byte of
//! the sum of the preceding bytes.

const POWER: u8 = 0x71;
const POWER_ON: u8 = 0x23;
const POWER_OFF: u8 = 0x24;
const COLOR: u8 = 0x31;
/// Change only the white channel, not the RGB ones.
const WHITE_ONLY: u8 = 0x0f;
/// Marks a frame as sent from a local client rather than the cloud.
const LOCAL: u8 = 0x0f;

fn checksum(frame: &[u8]) -> u8 {
    frame.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte))
}

fn sealed(mut frame: Vec<u8>) -> Vec<u8> {
    frame.push(checksum(&frame));
    frame
}

pub(crate) fn power(on: bool) -> Vec<u8> {
    sealed(vec![POWER, if on { POWER_ON } else { POWER_OFF }, LOCAL])
}

pub(crate) fn warm_white(level: u8) -> Vec<u8> {
    sealed(vec![COLOR, 0, 0, 0, level, WHITE_ONLY, LOCAL])
}
