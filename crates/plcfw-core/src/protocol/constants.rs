//! Fixed wire values of the firmware container and the bootcode protocol.

// Firmware container section ids
pub const SECTION_ID_EBL: u32 = 1;
pub const SECTION_ID_USER_CONFIG: u32 = 4;
pub const SECTION_ID_HW_VECTORS: u32 = 5;
pub const SECTION_ID_GLOBAL_PARAMS: u32 = 6;
pub const SECTION_ID_CPU_IMAGES: u32 = 7;
pub const SECTION_ID_BIN_FILE_HEADER: u32 = 0x53474852; // ASCII tag, read as a LE word

/// Size of the `{id, checksum, length}` header in front of every section.
pub const SECTION_HEADER_LEN: usize = 12;

// Flash section descriptor magics (EBL application header)
pub const MAGIC_BIN_FILE_HEADER: u32 = 0xAABBFFEE;
pub const MAGIC_GLOBAL_PARAMS: u32 = 0xAABBDDCC;
pub const MAGIC_HW_VECTORS: u32 = 0xAABBAABB;
pub const MAGIC_USER_CONFIG: u32 = 0xCCCBBCCC;
pub const MAGIC_APP: u32 = 0xB17890B1;

/// Maximum number of flash section descriptors in the application header.
pub const MAX_FLASH_SECTIONS: usize = 4;

/// Signature at the start of a compressed HW-vector section.
pub const LZOZ_SIGNATURE: &[u8; 7] = b"LZOZ100";

/// Device address the EBL block is written to before anything else.
pub const EBL_LOAD_ADDRESS: u32 = 0x2000_0000;

/// Ethernet timing control register, cleared when the board runs RMII.
pub const RMII_TIMING_REGISTER: u32 = 0x1E01_0024;

/// Opaque session identifier carried by every bootcode exchange.
pub const SESSION_ID: u16 = 0x0100;

/// Ethertype of the management channel.
pub const PLC_ETHER_TYPE: u16 = 0x22E3;

// Core identifiers as they appear in CPU image headers
pub const CPU_ID_CP: u32 = 0;
pub const CPU_ID_CMU: u32 = 1;
pub const CPU_ID_SEG: u32 = 2;
pub const CPU_ID_LCU: u32 = 3;
pub const CPU_ID_PCU: u32 = 4;

// Link addresses the auxiliary cores are compiled against (DMI view)
pub const COMPILED_ICCM_BASE: u32 = 0x0010_0000;
pub const COMPILED_DCCM_BASE: u32 = 0x0080_0000;

// Default transfer and polling parameters
pub const DEFAULT_CHUNK_SIZE: usize = 1024;
pub const DEFAULT_IMAGE_PACKET_SIZE: usize = 256;
pub const DEFAULT_RMII_WRITE_RETRIES: u32 = 3;
pub const DEFAULT_POLL_ATTEMPTS: u32 = 100;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_USER_CONFIG_SIZE: u32 = 4096;
