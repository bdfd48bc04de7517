// Rotor state decoding from the three photo-interrupter / Hall inputs

/// Sensor vector to rotor state, bit i = sensor i level.
/// 0b000 and 0b111 cannot occur on a healthy rotor and map to the sentinel 7.
const STANDARD_STATE_MAP: [u8; 8] = [7, 5, 3, 4, 1, 0, 2, 7];

/// Same as [`STANDARD_STATE_MAP`] for assemblies whose input or drive phase order is reversed
const REVERSED_STATE_MAP: [u8; 8] = [7, 1, 3, 2, 5, 0, 4, 7];

/// Sensor-to-phase wiring convention of the motor assembly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorWiring {
    Standard,
    Reversed,
}

impl SensorWiring {
    fn table(self) -> &'static [u8; 8] {
        match self {
            Self::Standard => &STANDARD_STATE_MAP,
            Self::Reversed => &REVERSED_STATE_MAP,
        }
    }
}

/// One of the six rotor sectors, or the invalid sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RotorState(u8);

impl RotorState {
    /// Sentinel for sensor vectors 0b000 and 0b111
    pub const INVALID: Self = Self(7);

    pub const ORIGIN: Self = Self(0);

    /// Create a valid rotor state, `None` outside 0..=5
    pub const fn new(state: u8) -> Option<Self> {
        if state < 6 {
            Some(Self(state))
        } else {
            None
        }
    }

    pub const fn is_valid(self) -> bool {
        self.0 < 6
    }

    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

/// Pack three sensor levels into a sensor vector
#[inline(always)]
pub fn sensor_vector(s1: bool, s2: bool, s3: bool) -> u8 {
    (s1 as u8) | ((s2 as u8) << 1) | ((s3 as u8) << 2)
}

/// Decode a 3-bit sensor vector into a rotor state
#[inline(always)]
pub fn decode(vector: u8, wiring: SensorWiring) -> RotorState {
    RotorState(wiring.table()[(vector & 0x07) as usize])
}
