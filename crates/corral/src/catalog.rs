//! ZCL identifier catalog
//!
//! Maps cluster, attribute, foundation-command, and status identifiers to
//! their ZCL shorthand names and back. Identifiers outside the table
//! round-trip as their decimal string form, so unknown clusters and
//! attributes stay addressable in the cache and in events.

/// A cluster or attribute argument: numeric id or shorthand name.
#[derive(Debug, Clone, Copy)]
pub enum ZclKey<'a> {
    Id(u16),
    Name(&'a str),
}

impl From<u16> for ZclKey<'static> {
    fn from(id: u16) -> Self {
        ZclKey::Id(id)
    }
}

impl<'a> From<&'a str> for ZclKey<'a> {
    fn from(name: &'a str) -> Self {
        ZclKey::Name(name)
    }
}

type AttrDef = (u16, &'static str, u8);

/// (cluster id, shorthand name, attribute table)
type ClusterDef = (u16, &'static str, &'static [AttrDef]);

// Data types are the ZCL type octet (boolean 0x10, uint8 0x20, uint16 0x21,
// int16 0x29, enum8 0x30, string 0x42, ...).
static CLUSTERS: &[ClusterDef] = &[
    (
        0x0000,
        "genBasic",
        &[
            (0x0000, "zclVersion", 0x20),
            (0x0001, "appVersion", 0x20),
            (0x0002, "stackVersion", 0x20),
            (0x0003, "hwVersion", 0x20),
            (0x0004, "manufacturerName", 0x42),
            (0x0005, "modelId", 0x42),
            (0x0006, "dateCode", 0x42),
            (0x0007, "powerSource", 0x30),
            (0x4000, "swBuildId", 0x42),
        ],
    ),
    (
        0x0001,
        "genPowerCfg",
        &[
            (0x0000, "mainsVoltage", 0x21),
            (0x0020, "batteryVoltage", 0x20),
            (0x0021, "batteryPercentageRemaining", 0x20),
        ],
    ),
    (0x0003, "genIdentify", &[(0x0000, "identifyTime", 0x21)]),
    (0x0004, "genGroups", &[(0x0000, "nameSupport", 0x18)]),
    (
        0x0005,
        "genScenes",
        &[
            (0x0000, "count", 0x20),
            (0x0001, "currentScene", 0x20),
            (0x0002, "currentGroup", 0x21),
            (0x0003, "sceneValid", 0x10),
            (0x0004, "nameSupport", 0x18),
        ],
    ),
    (
        0x0006,
        "genOnOff",
        &[
            (0x0000, "onOff", 0x10),
            (0x4001, "onTime", 0x21),
            (0x4002, "offWaitTime", 0x21),
        ],
    ),
    (
        0x0008,
        "genLevelCtrl",
        &[
            (0x0000, "currentLevel", 0x20),
            (0x0001, "remainingTime", 0x21),
            (0x0010, "onOffTransitionTime", 0x21),
        ],
    ),
    (0x0009, "genAlarms", &[(0x0000, "alarmCount", 0x21)]),
    (0x000a, "genTime", &[(0x0000, "time", 0x23)]),
    (
        0x0101,
        "closuresDoorLock",
        &[
            (0x0000, "lockState", 0x30),
            (0x0001, "lockType", 0x30),
            (0x0002, "actuatorEnabled", 0x10),
        ],
    ),
    (
        0x0102,
        "closuresWindowCovering",
        &[
            (0x0000, "windowCoveringType", 0x30),
            (0x0008, "currentPositionLiftPercentage", 0x20),
        ],
    ),
    (
        0x0201,
        "hvacThermostat",
        &[
            (0x0000, "localTemp", 0x29),
            (0x0011, "occupiedCoolingSetpoint", 0x29),
            (0x0012, "occupiedHeatingSetpoint", 0x29),
            (0x001c, "systemMode", 0x30),
        ],
    ),
    (
        0x0202,
        "hvacFanCtrl",
        &[(0x0000, "fanMode", 0x30), (0x0001, "fanModeSequence", 0x30)],
    ),
    (
        0x0300,
        "lightingColorCtrl",
        &[
            (0x0000, "currentHue", 0x20),
            (0x0001, "currentSaturation", 0x20),
            (0x0003, "currentX", 0x21),
            (0x0004, "currentY", 0x21),
            (0x0007, "colorTemperature", 0x21),
            (0x0008, "colorMode", 0x30),
        ],
    ),
    (
        0x0400,
        "msIlluminanceMeasurement",
        &[
            (0x0000, "measuredValue", 0x21),
            (0x0001, "minMeasuredValue", 0x21),
            (0x0002, "maxMeasuredValue", 0x21),
        ],
    ),
    (
        0x0402,
        "msTemperatureMeasurement",
        &[
            (0x0000, "measuredValue", 0x29),
            (0x0001, "minMeasuredValue", 0x29),
            (0x0002, "maxMeasuredValue", 0x29),
            (0x0003, "tolerance", 0x21),
        ],
    ),
    (0x0403, "msPressureMeasurement", &[(0x0000, "measuredValue", 0x29)]),
    (0x0405, "msRelativeHumidity", &[(0x0000, "measuredValue", 0x21)]),
    (
        0x0406,
        "msOccupancySensing",
        &[
            (0x0000, "occupancy", 0x18),
            (0x0001, "occupancySensorType", 0x30),
        ],
    ),
    (
        0x0500,
        "ssIasZone",
        &[
            (0x0000, "zoneState", 0x30),
            (0x0001, "zoneType", 0x31),
            (0x0002, "zoneStatus", 0x19),
            (0x0010, "iasCieAddr", 0xf0),
            (0x0011, "zoneId", 0x20),
        ],
    ),
    (
        0x0702,
        "seMetering",
        &[
            (0x0000, "currentSummDelivered", 0x25),
            (0x0400, "instantaneousDemand", 0x2a),
        ],
    ),
    (
        0x0b04,
        "haElectricalMeasurement",
        &[
            (0x0505, "rmsVoltage", 0x21),
            (0x0508, "rmsCurrent", 0x21),
            (0x050b, "activePower", 0x29),
        ],
    ),
];

static FOUNDATION: &[(u8, &str)] = &[
    (0, "read"),
    (1, "readRsp"),
    (2, "write"),
    (3, "writeUndiv"),
    (4, "writeRsp"),
    (5, "writeNoRsp"),
    (6, "configReport"),
    (7, "configReportRsp"),
    (8, "readReportConfig"),
    (9, "readReportConfigRsp"),
    (10, "report"),
    (11, "defaultRsp"),
    (12, "discover"),
    (13, "discoverRsp"),
];

static STATUS: &[(u8, &str)] = &[
    (0x00, "SUCCESS"),
    (0x01, "FAILURE"),
    (0x7e, "NOT_AUTHORIZED"),
    (0x80, "MALFORMED_COMMAND"),
    (0x81, "UNSUP_CLUSTER_COMMAND"),
    (0x86, "UNSUPPORTED_ATTRIBUTE"),
    (0x87, "INVALID_VALUE"),
    (0x88, "READ_ONLY"),
    (0x89, "INSUFFICIENT_SPACE"),
    (0x8b, "NOT_FOUND"),
    (0x8c, "UNREPORTABLE_ATTRIBUTE"),
    (0x8d, "INVALID_DATA_TYPE"),
    (0xc2, "UNSUPPORTED_CLUSTER"),
];

fn cluster_def(id: u16) -> Option<&'static ClusterDef> {
    CLUSTERS.iter().find(|(cid, _, _)| *cid == id)
}

/// Shorthand name for a known cluster id.
pub fn cluster_name(id: u16) -> Option<&'static str> {
    cluster_def(id).map(|(_, name, _)| *name)
}

/// Cluster id for a shorthand name.
pub fn cluster_id(name: &str) -> Option<u16> {
    CLUSTERS
        .iter()
        .find(|(_, n, _)| *n == name)
        .map(|(id, _, _)| *id)
}

/// Cache/event key for a cluster id: name when known, decimal otherwise.
pub fn cluster_key(id: u16) -> String {
    cluster_name(id).map_or_else(|| id.to_string(), str::to_string)
}

/// Shorthand name for a known attribute of a cluster.
pub fn attr_name(cluster: u16, attr: u16) -> Option<&'static str> {
    cluster_def(cluster)?
        .2
        .iter()
        .find(|(id, _, _)| *id == attr)
        .map(|(_, name, _)| *name)
}

/// Attribute id for a shorthand name within a cluster.
pub fn attr_id(cluster: u16, name: &str) -> Option<u16> {
    cluster_def(cluster)?
        .2
        .iter()
        .find(|(_, n, _)| *n == name)
        .map(|(id, _, _)| *id)
}

/// Cache/event key for an attribute id: name when known, decimal otherwise.
pub fn attr_key(cluster: u16, attr: u16) -> String {
    attr_name(cluster, attr).map_or_else(|| attr.to_string(), str::to_string)
}

/// ZCL data type octet for a known attribute.
pub fn attr_type(cluster: u16, attr: u16) -> Option<u8> {
    cluster_def(cluster)?
        .2
        .iter()
        .find(|(id, _, _)| *id == attr)
        .map(|(_, _, ty)| *ty)
}

pub fn foundation_name(cmd: u8) -> Option<&'static str> {
    FOUNDATION.iter().find(|(id, _)| *id == cmd).map(|(_, n)| *n)
}

pub fn foundation_id(name: &str) -> Option<u8> {
    FOUNDATION.iter().find(|(_, n)| *n == name).map(|(id, _)| *id)
}

/// Status name for a ZCL status octet, decimal when unknown.
pub fn status_key(code: u8) -> String {
    STATUS
        .iter()
        .find(|(c, _)| *c == code)
        .map_or_else(|| code.to_string(), |(_, n)| n.to_string())
}

/// Resolve a cluster argument to `(id, cache key)`.
///
/// Names are looked up in the table; unresolvable names that parse as a
/// decimal id are accepted numerically.
pub fn resolve_cluster(key: ZclKey<'_>) -> Option<(u16, String)> {
    match key {
        ZclKey::Id(id) => Some((id, cluster_key(id))),
        ZclKey::Name(name) => cluster_id(name)
            .map(|id| (id, name.to_string()))
            .or_else(|| name.parse::<u16>().ok().map(|id| (id, cluster_key(id)))),
    }
}

/// Resolve an attribute argument within a cluster to `(id, cache key)`.
pub fn resolve_attr(cluster: u16, key: ZclKey<'_>) -> Option<(u16, String)> {
    match key {
        ZclKey::Id(id) => Some((id, attr_key(cluster, id))),
        ZclKey::Name(name) => attr_id(cluster, name)
            .map(|id| (id, name.to_string()))
            .or_else(|| {
                name.parse::<u16>()
                    .ok()
                    .map(|id| (id, attr_key(cluster, id)))
            }),
    }
}
