/// Number of bytes in a FCGI_Header.  Future versions of the protocol
/// will not reduce this number.
pub const FCGI_HEADER_LEN: usize = 8;

/// Value for version component of FCGI_Header
pub const FCGI_VERSION_1: u8 = 1;

/// Largest content block a single record can carry
pub const FCGI_MAX_CONTENT_LEN: usize = 65535;

/// Largest padding block a single record can carry
pub const FCGI_MAX_PADDING_LEN: usize = 255;

/// Upper bound for a complete frame: header, content and padding
pub const FCGI_MAX_FRAME_LEN: usize =
    FCGI_HEADER_LEN + FCGI_MAX_CONTENT_LEN + FCGI_MAX_PADDING_LEN;

/// Value for requestId component of FCGI_Header used by management records
pub const FCGI_NULL_REQUEST_ID: u16 = 0;

/// Mask for flags component of FCGI_BeginRequestBody
pub const FCGI_KEEP_CONN: u8 = 1;

/// Values for type component of FCGI_Header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType
{
    BeginRequest = 1,
    AbortRequest = 2,
    EndRequest = 3,
    Params = 4,
    Stdin = 5,
    Stdout = 6,
    Stderr = 7,
    Data = 8,
    GetValues = 9,
    GetValuesResult = 10,
    UnknownType = 11,
}

impl RecordType {
    pub fn from_u8(value: u8) -> Option<RecordType>
    {
        match value {
            1 => Some(RecordType::BeginRequest),
            2 => Some(RecordType::AbortRequest),
            3 => Some(RecordType::EndRequest),
            4 => Some(RecordType::Params),
            5 => Some(RecordType::Stdin),
            6 => Some(RecordType::Stdout),
            7 => Some(RecordType::Stderr),
            8 => Some(RecordType::Data),
            9 => Some(RecordType::GetValues),
            10 => Some(RecordType::GetValuesResult),
            11 => Some(RecordType::UnknownType),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8
    {
        self as u8
    }
}

/// Values for role component of FCGI_BeginRequestBody
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role
{
    Responder = 1,
    Authorizer = 2,
    Filter = 3,
}

impl Role {
    pub fn from_u16(value: u16) -> Option<Role>
    {
        match value {
            1 => Some(Role::Responder),
            2 => Some(Role::Authorizer),
            3 => Some(Role::Filter),
            _ => None,
        }
    }
}

/// Values for protocolStatus component of FCGI_EndRequestBody
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolStatus
{
    RequestComplete = 0,
    CantMpxConn = 1,
    Overloaded = 2,
    UnknownRole = 3,
}

impl ProtocolStatus {
    pub fn to_u8(self) -> u8
    {
        self as u8
    }
}

#[test]
fn test_record_type_wire_values()
{
    for value in 1..=11u8 {
        let t = RecordType::from_u8(value).unwrap();
        assert_eq!(t.to_u8(), value);
    }
    assert_eq!(RecordType::from_u8(0), None);
    assert_eq!(RecordType::from_u8(12), None);
}

#[test]
fn test_role_wire_values()
{
    assert_eq!(Role::from_u16(1), Some(Role::Responder));
    assert_eq!(Role::from_u16(2), Some(Role::Authorizer));
    assert_eq!(Role::from_u16(3), Some(Role::Filter));
    assert_eq!(Role::from_u16(0), None);
    assert_eq!(Role::from_u16(4), None);
}
