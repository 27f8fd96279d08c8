//! The unified state vocabulary. States form a fixed set with a parent
//! hierarchy; only tokens from this set are valid values of state leaves.

macro_rules! states {
    ($($variant:ident($token:literal, $parent:expr)),+ $(,)?) => {
        /// A unified device state. The set is closed: states are only
        /// obtained from the associated constants or by `from_name`.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum State {
            $($variant),+
        }

        impl State {
            pub const ALL: &'static [State] = &[$(State::$variant),+];

            /// The token, as written into state leaves and `allowedStates`.
            pub fn name(&self) -> &'static str {
                match self {
                    $(State::$variant => $token),+
                }
            }

            /// The parent in the state hierarchy, if this is a derived state.
            pub fn parent(&self) -> Option<State> {
                match self {
                    $(State::$variant => $parent),+
                }
            }

            /// Resolve a token. Unknown tokens resolve to nothing; callers
            /// treat that as a validation failure, not a panic.
            pub fn from_name(name: &str) -> Option<State> {
                match name {
                    $($token => Some(State::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

states! {
    Unknown("UNKNOWN", None),
    Known("KNOWN", None),
    Init("INIT", None),

    Disabled("DISABLED", Some(State::Known)),
    Error("ERROR", Some(State::Known)),
    Normal("NORMAL", Some(State::Known)),

    Static("STATIC", Some(State::Normal)),
    Changing("CHANGING", Some(State::Normal)),
    Running("RUNNING", Some(State::Normal)),

    Passive("PASSIVE", Some(State::Static)),
    Active("ACTIVE", Some(State::Static)),

    Increasing("INCREASING", Some(State::Changing)),
    Decreasing("DECREASING", Some(State::Changing)),

    Interlocked("INTERLOCKED", Some(State::Disabled)),

    On("ON", Some(State::Active)),
    Started("STARTED", Some(State::Active)),
    Opened("OPENED", Some(State::Active)),
    Heated("HEATED", Some(State::Active)),
    Locked("LOCKED", Some(State::Active)),
    Engaged("ENGAGED", Some(State::Active)),
    Inserted("INSERTED", Some(State::Active)),

    Off("OFF", Some(State::Passive)),
    Stopped("STOPPED", Some(State::Passive)),
    Closed("CLOSED", Some(State::Passive)),
    Cooled("COOLED", Some(State::Passive)),
    Unlocked("UNLOCKED", Some(State::Passive)),
    Disengaged("DISENGAGED", Some(State::Passive)),
    Extracted("EXTRACTED", Some(State::Passive)),

    Moving("MOVING", Some(State::Changing)),
    Switching("SWITCHING", Some(State::Changing)),
    Opening("OPENING", Some(State::Changing)),
    Closing("CLOSING", Some(State::Changing)),
    Heating("HEATING", Some(State::Changing)),
    Cooling("COOLING", Some(State::Changing)),
    Starting("STARTING", Some(State::Changing)),
    Stopping("STOPPING", Some(State::Changing)),
    Homing("HOMING", Some(State::Changing)),
    Searching("SEARCHING", Some(State::Changing)),
    RampingUp("RAMPING_UP", Some(State::Increasing)),
    RampingDown("RAMPING_DOWN", Some(State::Decreasing)),

    Acquiring("ACQUIRING", Some(State::Running)),
    Processing("PROCESSING", Some(State::Running)),
    Monitoring("MONITORING", Some(State::Running)),
}

impl State {
    /// Walk the parent chain: `MOVING.is_derived_from(NORMAL)` holds,
    /// `MOVING.is_derived_from(STATIC)` does not.
    pub fn is_derived_from(&self, ancestor: State) -> bool {
        let mut cur = self.parent();
        while let Some(state) = cur {
            if state == ancestor {
                return true;
            }
            cur = state.parent();
        }
        false
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tokens_resolve_and_round_trip() {
        for state in State::ALL {
            assert_eq!(State::from_name(state.name()), Some(*state));
        }
        assert_eq!(State::from_name("NotAState"), None);
    }

    #[test]
    fn hierarchy_walks_to_ancestors() {
        assert!(State::Moving.is_derived_from(State::Changing));
        assert!(State::Moving.is_derived_from(State::Normal));
        assert!(State::Moving.is_derived_from(State::Known));
        assert!(!State::Moving.is_derived_from(State::Static));
        assert!(!State::Unknown.is_derived_from(State::Known));
        assert!(State::RampingUp.is_derived_from(State::Changing));
    }
}
