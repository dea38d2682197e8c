use std::fmt;

use crate::codec::CodecError;

/// Animation a character is playing, as carried in the last byte of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum AnimationState {
    #[default]
    Idle = 0,
    Walking = 1,
    Running = 2,
    JumpToAir = 3,
    Air = 4,
    AirToGround = 5,
}

impl AnimationState {
    pub const ALL: [AnimationState; 6] = [
        AnimationState::Idle,
        AnimationState::Walking,
        AnimationState::Running,
        AnimationState::JumpToAir,
        AnimationState::Air,
        AnimationState::AirToGround,
    ];

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for AnimationState {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AnimationState::Idle),
            1 => Ok(AnimationState::Walking),
            2 => Ok(AnimationState::Running),
            3 => Ok(AnimationState::JumpToAir),
            4 => Ok(AnimationState::Air),
            5 => Ok(AnimationState::AirToGround),
            _ => Err(CodecError::UnknownAnimationState { value }),
        }
    }
}

impl fmt::Display for AnimationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnimationState::Idle => "idle",
            AnimationState::Walking => "walking",
            AnimationState::Running => "running",
            AnimationState::JumpToAir => "jump-to-air",
            AnimationState::Air => "air",
            AnimationState::AirToGround => "air-to-ground",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Rotation about the vertical axis, stored as the `y` and `w` parts of a
/// unit quaternion whose `x` and `z` parts are always zero.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Orientation {
    pub y: f32,
    pub w: f32,
}

impl Orientation {
    pub fn new(y: f32, w: f32) -> Self {
        Self { y, w }
    }

    /// Builds the quaternion for a heading of `yaw` radians.
    pub fn from_yaw(yaw: f32) -> Self {
        let half = yaw * 0.5;
        Self {
            y: half.sin(),
            w: half.cos(),
        }
    }

    pub fn yaw(&self) -> f32 {
        2.0 * self.y.atan2(self.w)
    }
}

/// The synchronized snapshot of one participant.
///
/// A record is always replaced as a whole; nothing merges individual fields.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StateRecord {
    pub id: u16,
    pub position: Position,
    pub orientation: Orientation,
    pub state: AnimationState,
}

impl StateRecord {
    /// A zeroed record for a participant that has not reported yet.
    pub fn new(id: u16) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: u16) -> Self {
        self.id = id;
        self
    }
}
