use thiserror::Error;

/// Largest register block a single read may request.
pub const MAX_READ_REGISTERS: u16 = 125;
/// Largest coil block a single read may request.
pub const MAX_READ_COILS: u16 = 2000;

const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModbusUnitError {
    #[error("Start address is empty")]
    AddressIsEmpty,

    #[error("Invalid length: {0} is outside 1..={1}")]
    InvalidLength(u16, u16),

    #[error("Invalid range: {0} + {1} = {2} > 65536")]
    RangeToMatch(u16, u16, u32),

    #[error("Register type is empty")]
    InvalidRegisterType,

    #[error("Type {0:?} haven't write command")]
    InvalidRegisterTypeForWriteCommand(RegisterType),

    #[error("Empty response received")]
    EmptyResponse,

    #[error("Modbus exception: function code {0:#x}, exception code {1:#x}")]
    ModbusException(u8, u8),

    #[error("Unexpected function code: expected {0:#x}, got {1:#x}")]
    UnexpectedFunctionCode(u8, u8),

    #[error("Invalid response length")]
    InvalidResponseLength,

    #[error("Write echo mismatch")]
    EchoMismatch,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegisterType {
    CoilRegister,
    HoldingRegister,
    InputRegister,
}

impl RegisterType {
    fn read_command(self) -> u8 {
        match self {
            RegisterType::CoilRegister => 0x01,
            RegisterType::HoldingRegister => 0x03,
            RegisterType::InputRegister => 0x04,
        }
    }

    fn write_command(self) -> Option<u8> {
        match self {
            RegisterType::CoilRegister => Some(0x05),
            RegisterType::HoldingRegister => Some(0x06),
            RegisterType::InputRegister => None,
        }
    }

    fn max_read_length(self) -> u16 {
        match self {
            RegisterType::CoilRegister => MAX_READ_COILS,
            RegisterType::HoldingRegister | RegisterType::InputRegister => MAX_READ_REGISTERS,
        }
    }
}

/// A contiguous block of one register type on the slave, able to build the
/// request PDUs for it and to parse the matching responses.
#[derive(Clone, Debug)]
pub struct ModbusUnit {
    start_addr: u16,
    length: u16,
    register_type: RegisterType,
}

#[derive(Default)]
pub struct ModbusUnitBuilder {
    start_addr: Option<u16>,
    length: Option<u16>,
    register_type: Option<RegisterType>,
}

impl ModbusUnitBuilder {
    pub fn address(mut self, addr: u16) -> Self {
        self.start_addr = Some(addr);
        self
    }

    pub fn length(mut self, length: u16) -> Self {
        self.length = Some(length);
        self
    }

    pub fn register_type(mut self, register_type: RegisterType) -> Self {
        self.register_type = Some(register_type);
        self
    }

    pub fn build(self) -> Result<ModbusUnit, ModbusUnitError> {
        let start_addr = self.start_addr.ok_or(ModbusUnitError::AddressIsEmpty)?;
        let register_type = self
            .register_type
            .ok_or(ModbusUnitError::InvalidRegisterType)?;
        let length = self.length.unwrap_or(1);

        let max = register_type.max_read_length();
        if length == 0 || length > max {
            return Err(ModbusUnitError::InvalidLength(length, max));
        }

        let end_addr = start_addr as u32 + length as u32;
        if end_addr > 0x1_0000 {
            return Err(ModbusUnitError::RangeToMatch(start_addr, length, end_addr));
        }

        Ok(ModbusUnit {
            start_addr,
            length,
            register_type,
        })
    }
}

impl ModbusUnit {
    pub fn builder() -> ModbusUnitBuilder {
        ModbusUnitBuilder::default()
    }

    pub fn address(&self) -> u16 {
        self.start_addr
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn register_type(&self) -> RegisterType {
        self.register_type
    }

    pub fn create_read_request(&self) -> Vec<u8> {
        let mut msg = Vec::with_capacity(5);
        msg.push(self.register_type.read_command());
        msg.extend_from_slice(&self.start_addr.to_be_bytes());
        msg.extend_from_slice(&self.length.to_be_bytes());
        msg // all data for read validated in builder
    }

    /// Single write of `value` to the first address of the block.
    ///
    /// Coils are on for any non-zero value and go out as 0xFF00 / 0x0000.
    pub fn create_write_request(&self, value: u16) -> Result<Vec<u8>, ModbusUnitError> {
        let cmd = self.register_type.write_command().ok_or(
            ModbusUnitError::InvalidRegisterTypeForWriteCommand(self.register_type),
        )?;

        let wire_value = match self.register_type {
            RegisterType::CoilRegister if value != 0 => COIL_ON,
            RegisterType::CoilRegister => COIL_OFF,
            _ => value,
        };

        let mut result = Vec::with_capacity(5);
        result.push(cmd);
        result.extend_from_slice(&self.start_addr.to_be_bytes());
        result.extend_from_slice(&wire_value.to_be_bytes());
        Ok(result)
    }

    pub fn parse_read_response(&self, pdu: &[u8]) -> Result<Vec<u16>, ModbusUnitError> {
        check_function_code(pdu, self.register_type.read_command())?;

        match self.register_type {
            RegisterType::HoldingRegister | RegisterType::InputRegister => {
                self.parse_registers(pdu)
            }
            RegisterType::CoilRegister => self.parse_coils(pdu),
        }
    }

    /// Single-write responses echo the request; anything else is rejected.
    pub fn parse_write_response(&self, request: &[u8], pdu: &[u8]) -> Result<(), ModbusUnitError> {
        let expected_fc = request.first().copied().ok_or(ModbusUnitError::EmptyResponse)?;
        check_function_code(pdu, expected_fc)?;

        if pdu.len() != request.len() {
            return Err(ModbusUnitError::InvalidResponseLength);
        }
        if pdu != request {
            return Err(ModbusUnitError::EchoMismatch);
        }
        Ok(())
    }

    fn parse_registers(&self, pdu: &[u8]) -> Result<Vec<u16>, ModbusUnitError> {
        if pdu.len() < 2 {
            return Err(ModbusUnitError::InvalidResponseLength);
        }

        let byte_count = pdu[1] as usize;
        let expected_bytes = self.length as usize * 2;

        if byte_count != expected_bytes || pdu.len() < 2 + byte_count {
            return Err(ModbusUnitError::InvalidResponseLength);
        }

        Ok(pdu[2..2 + byte_count]
            .chunks_exact(2)
            .map(|word| u16::from_be_bytes([word[0], word[1]]))
            .collect())
    }

    fn parse_coils(&self, pdu: &[u8]) -> Result<Vec<u16>, ModbusUnitError> {
        if pdu.len() < 2 {
            return Err(ModbusUnitError::InvalidResponseLength);
        }

        let byte_count = pdu[1] as usize;
        let expected_bytes = (self.length as usize).div_ceil(8);

        if byte_count != expected_bytes || pdu.len() < 2 + byte_count {
            return Err(ModbusUnitError::InvalidResponseLength);
        }

        Ok((0..self.length as usize)
            .map(|i| ((pdu[2 + i / 8] >> (i % 8)) & 0x01) as u16)
            .collect())
    }
}

fn check_function_code(pdu: &[u8], expected: u8) -> Result<(), ModbusUnitError> {
    let function_code = *pdu.first().ok_or(ModbusUnitError::EmptyResponse)?;

    // exception responses set the high bit of the function code
    if (function_code & 0x80) != 0 {
        let exception_code = pdu.get(1).copied().unwrap_or(0);
        return Err(ModbusUnitError::ModbusException(function_code, exception_code));
    }

    if function_code != expected {
        return Err(ModbusUnitError::UnexpectedFunctionCode(expected, function_code));
    }
    Ok(())
}
