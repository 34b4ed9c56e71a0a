pub const CLUSTER_ID_ON_OFF: u32 = 0x0006;
pub const CLUSTER_ON_OFF_ATTR_ID_ON_OFF: u32 = 0x0000;
pub const CLUSTER_ON_OFF_CMD_ID_OFF: u32 = 0x00;
pub const CLUSTER_ON_OFF_CMD_ID_ON: u32 = 0x01;
pub const CLUSTER_ON_OFF_CMD_ID_TOGGLE: u32 = 0x02;

pub const CLUSTER_ID_DESCRIPTOR: u32 = 0x001D;
pub const CLUSTER_DESCRIPTOR_ATTR_ID_PARTS_LIST: u32 = 0x0003;

pub const CLUSTER_ID_POWER_SOURCE: u32 = 0x002F;
pub const CLUSTER_POWER_SOURCE_ATTR_ID_BAT_PERCENT_REMAINING: u32 = 0x000C;

pub const CLUSTER_ID_BRIDGED_DEVICE_BASIC_INFORMATION: u32 = 0x0039;
pub const CLUSTER_BRIDGED_DEVICE_BASIC_INFORMATION_ATTR_ID_NODE_LABEL: u32 = 0x0005;
pub const CLUSTER_BRIDGED_DEVICE_BASIC_INFORMATION_ATTR_ID_REACHABLE: u32 = 0x0011;
pub const CLUSTER_BRIDGED_DEVICE_BASIC_INFORMATION_ATTR_ID_UNIQUE_ID: u32 = 0x0012;

pub const CLUSTER_ID_DOOR_LOCK: u32 = 0x0101;
pub const CLUSTER_DOOR_LOCK_CMD_ID_LOCK_DOOR: u32 = 0x00;
pub const CLUSTER_DOOR_LOCK_CMD_ID_UNLOCK_DOOR: u32 = 0x01;
/// Context tag of the optional PIN code field in lock/unlock requests.
pub const CLUSTER_DOOR_LOCK_FIELD_PIN_CODE: u8 = 0;
