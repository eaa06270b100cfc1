//! Shared fixtures for unit and integration tests.

/// Small but complete DBC document: one standard-frame message with a
/// Motorola signed signal and an Intel unsigned signal, one J1939-style
/// extended-frame message, a message comment and a cycle-time attribute.
pub const DBC_FIXTURE: &str = r#"VERSION "1.0"

NS_ :
	NS_DESC_
	CM_
	BA_DEF_
	BA_
	VAL_
	BA_DEF_DEF_
	VAL_TABLE_

BS_:

BU_: ECU SENSOR

BO_ 496 EngineData: 8 ECU
 SG_ Temperature : 0|12@0- (0.01,250) [229.52|270.47] "degK" SENSOR
 SG_ Rpm : 24|16@1+ (0.125,0) [0|8000] "rpm" SENSOR

BO_ 2364539904 VehicleSpeed: 8 ECU
 SG_ Speed : 0|16@1+ (0.00390625,0) [0|250.996] "km/h" SENSOR

CM_ BO_ 496 "Engine state broadcast";
BA_DEF_ BO_ "GenMsgCycleTime" INT 0 10000;
BA_DEF_DEF_ "GenMsgCycleTime" 1000;
BA_ "GenMsgCycleTime" BO_ 496 100;
"#;

/// Wire identifier of the `EngineData` fixture message.
pub const ENGINE_DATA_ID: u32 = 496;

/// Raw (flagged) wire identifier of the `VehicleSpeed` fixture message:
/// extended identifier 0x0CF00400 with the extended marker bit set.
pub const VEHICLE_SPEED_ID: u32 = 0x8CF0_0400;

/// Build a library from the fixture document.
pub fn fixture_library() -> crate::dbc::DbcLibrary {
    crate::dbc::DbcLibrary::from_str(DBC_FIXTURE).expect("fixture DBC parses")
}
