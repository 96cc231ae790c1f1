//! The interpreter.

use alloy_primitives::{keccak256, Address, B256, U256};

use rust_eth_ledger_types::crypto;

use crate::fees;
use crate::host::VmHost;
use crate::instruction::Instruction;
use crate::VmError;

/// The stack machine.
///
/// Execution is a fetch/charge/execute loop: each step prices the opcode
/// (including any memory expansion it would cause), fails with
/// [`VmError::OutOfGas`] before any effect if the price exceeds the
/// remaining gas, and only then mutates stack, memory and host. Gas is
/// monotonically non-increasing except where `CALL` hands back its
/// callee's unspent budget.
#[derive(Debug, Clone, Default)]
pub struct Vm {
    gas: U256,
    pc: u64,
    stack: Vec<U256>,
    memory: Vec<u8>,
    breakpoints: Vec<u64>,
}

impl Vm {
    /// A machine primed with a gas budget.
    pub fn new(gas: U256) -> Self {
        Self { gas, ..Default::default() }
    }

    /// Clears the machine and re-arms it with `gas`.
    pub fn reset(&mut self, gas: U256) {
        *self = Self { gas, breakpoints: std::mem::take(&mut self.breakpoints), ..Default::default() };
    }

    /// Remaining gas.
    pub fn gas(&self) -> U256 {
        self.gas
    }

    /// Current program counter.
    pub fn pc(&self) -> u64 {
        self.pc
    }

    /// The operand stack, bottom first.
    pub fn stack(&self) -> &[U256] {
        &self.stack
    }

    /// The memory vector.
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Registers a debugging breakpoint; reaching it raises
    /// [`VmError::BreakPointHit`] unless the run started there.
    pub fn set_breakpoint(&mut self, pc: u64) {
        self.breakpoints.push(pc);
    }

    /// Runs to termination, returning the `RETURN`ed bytes.
    pub fn go<H: VmHost>(&mut self, ext: &mut H) -> Result<Vec<u8>, VmError> {
        self.go_steps(ext, u64::MAX)
    }

    /// Runs at most `steps` operations; raises [`VmError::StepsDone`] if the
    /// program has not terminated by then.
    pub fn go_steps<H: VmHost>(&mut self, ext: &mut H, mut steps: u64) -> Result<Vec<u8>, VmError> {
        let entry_pc = self.pc;
        loop {
            if steps == 0 {
                return Err(VmError::StepsDone);
            }
            steps -= 1;

            if self.pc != entry_pc && self.breakpoints.contains(&self.pc) {
                return Err(VmError::BreakPointHit);
            }

            let inst = Instruction::from_u8(ext.code_at(self.pc));
            let mut next_pc = self.pc + 1;

            // FEES. Price the step and any memory growth before touching
            // anything; peeks here must not disturb the stack.
            let mut run_gas = U256::from(fees::STEP_GAS);
            let mut new_mem = self.memory.len() as u128;
            match inst {
                Some(Instruction::Stop) | Some(Instruction::Suicide) => {
                    run_gas = U256::ZERO;
                }
                Some(Instruction::SStore) => {
                    self.require(2)?;
                    let old = ext.store(self.peek(0)?)?;
                    let new = self.peek(1)?;
                    run_gas = if old.is_zero() && !new.is_zero() {
                        U256::from(fees::SSTORE_GAS * 2)
                    } else if !old.is_zero() && new.is_zero() {
                        U256::ZERO
                    } else {
                        U256::from(fees::SSTORE_GAS)
                    };
                }
                Some(Instruction::SLoad) => {
                    run_gas = U256::from(fees::STEP_GAS + fees::SLOAD_GAS);
                }
                Some(Instruction::MStore) => {
                    self.require(2)?;
                    new_mem = to_mem(self.peek(0)?).saturating_add(32);
                }
                Some(Instruction::MStore8) => {
                    self.require(2)?;
                    new_mem = to_mem(self.peek(0)?).saturating_add(1);
                }
                Some(Instruction::MLoad) => {
                    self.require(1)?;
                    new_mem = to_mem(self.peek(0)?).saturating_add(32);
                }
                Some(Instruction::Return) => {
                    self.require(2)?;
                    new_mem = to_mem(self.peek(0)?).saturating_add(to_mem(self.peek(1)?));
                }
                Some(Instruction::Sha3) => {
                    self.require(2)?;
                    run_gas = U256::from(fees::SHA3_GAS);
                    new_mem = to_mem(self.peek(0)?).saturating_add(to_mem(self.peek(1)?));
                }
                Some(Instruction::Ecrecover) => {
                    self.require(3)?;
                    run_gas = U256::from(fees::ECRECOVER_GAS);
                }
                Some(Instruction::CallDataCopy) | Some(Instruction::CodeCopy) => {
                    self.require(3)?;
                    new_mem = to_mem(self.peek(0)?).saturating_add(to_mem(self.peek(2)?));
                }
                Some(Instruction::Balance) => {
                    run_gas = U256::from(fees::BALANCE_GAS);
                }
                Some(Instruction::Call) => {
                    self.require(7)?;
                    run_gas = U256::from(fees::CALL_GAS).saturating_add(self.peek(0)?);
                    let in_end = to_mem(self.peek(3)?).saturating_add(to_mem(self.peek(4)?));
                    let out_end = to_mem(self.peek(5)?).saturating_add(to_mem(self.peek(6)?));
                    new_mem = in_end.max(out_end);
                }
                Some(Instruction::Create) => {
                    self.require(3)?;
                    run_gas = U256::from(fees::STEP_GAS + fees::CREATE_GAS);
                    new_mem = to_mem(self.peek(1)?).saturating_add(to_mem(self.peek(2)?));
                }
                _ => {}
            }

            new_mem = new_mem.saturating_add(31) / 32 * 32;
            let cur_mem = self.memory.len() as u128;
            if new_mem > cur_mem {
                run_gas = run_gas
                    .saturating_add(U256::from((new_mem - cur_mem) / 32 * fees::MEMORY_GAS as u128));
            }

            if self.gas < run_gas {
                self.gas = U256::ZERO;
                return Err(VmError::OutOfGas);
            }
            self.gas -= run_gas;

            if new_mem > cur_mem {
                let new_len = usize::try_from(new_mem).map_err(|_| VmError::OutOfGas)?;
                self.memory.resize(new_len, 0);
            }

            // EXECUTE.
            let Some(inst) = inst else {
                return Err(VmError::BadInstruction);
            };
            match inst {
                Instruction::Add => {
                    self.require(2)?;
                    let top = self.pop()?;
                    let second = self.pop()?;
                    self.push(second.wrapping_add(top));
                }
                Instruction::Mul => {
                    self.require(2)?;
                    let top = self.pop()?;
                    let second = self.pop()?;
                    self.push(second.wrapping_mul(top));
                }
                Instruction::Sub => {
                    self.require(2)?;
                    let top = self.pop()?;
                    let second = self.pop()?;
                    self.push(top.wrapping_sub(second));
                }
                Instruction::Div => {
                    self.require(2)?;
                    let top = self.pop()?;
                    let second = self.pop()?;
                    self.push(if second.is_zero() { U256::ZERO } else { top / second });
                }
                Instruction::Sdiv => {
                    self.require(2)?;
                    let top = self.pop()?;
                    let second = self.pop()?;
                    self.push(signed_div(top, second));
                }
                Instruction::Mod => {
                    self.require(2)?;
                    let top = self.pop()?;
                    let second = self.pop()?;
                    self.push(if second.is_zero() { U256::ZERO } else { top % second });
                }
                Instruction::Smod => {
                    self.require(2)?;
                    let top = self.pop()?;
                    let second = self.pop()?;
                    self.push(signed_rem(top, second));
                }
                Instruction::Exp => {
                    self.require(2)?;
                    let base = self.pop()?;
                    let exponent = self.pop()?;
                    self.push(base.pow(exponent));
                }
                Instruction::Neg => {
                    self.require(1)?;
                    let top = self.pop()?;
                    self.push(top.wrapping_neg());
                }
                Instruction::Lt => {
                    self.require(2)?;
                    let top = self.pop()?;
                    let second = self.pop()?;
                    self.push(U256::from((top < second) as u8));
                }
                Instruction::Gt => {
                    self.require(2)?;
                    let top = self.pop()?;
                    let second = self.pop()?;
                    self.push(U256::from((top > second) as u8));
                }
                Instruction::Slt => {
                    self.require(2)?;
                    let top = self.pop()?;
                    let second = self.pop()?;
                    self.push(U256::from(
                        (alloy_primitives::I256::from_raw(top)
                            < alloy_primitives::I256::from_raw(second)) as u8,
                    ));
                }
                Instruction::Sgt => {
                    self.require(2)?;
                    let top = self.pop()?;
                    let second = self.pop()?;
                    self.push(U256::from(
                        (alloy_primitives::I256::from_raw(top)
                            > alloy_primitives::I256::from_raw(second)) as u8,
                    ));
                }
                Instruction::Eq => {
                    self.require(2)?;
                    let top = self.pop()?;
                    let second = self.pop()?;
                    self.push(U256::from((top == second) as u8));
                }
                Instruction::Not => {
                    self.require(1)?;
                    let top = self.pop()?;
                    self.push(U256::from(top.is_zero() as u8));
                }
                Instruction::And => {
                    self.require(2)?;
                    let top = self.pop()?;
                    let second = self.pop()?;
                    self.push(top & second);
                }
                Instruction::Or => {
                    self.require(2)?;
                    let top = self.pop()?;
                    let second = self.pop()?;
                    self.push(top | second);
                }
                Instruction::Xor => {
                    self.require(2)?;
                    let top = self.pop()?;
                    let second = self.pop()?;
                    self.push(top ^ second);
                }
                Instruction::Byte => {
                    self.require(2)?;
                    let index = self.pop()?;
                    let word = self.pop()?;
                    let value = if index < U256::from(32) {
                        let i = usize::try_from(index).unwrap_or(31);
                        U256::from(word.byte(31 - i))
                    } else {
                        U256::ZERO
                    };
                    self.push(value);
                }
                Instruction::Sha3 => {
                    let offset = as_usize(self.pop()?);
                    let size = as_usize(self.pop()?);
                    let hash = keccak256(&self.memory[offset..offset + size]);
                    self.push(U256::from_be_bytes(hash.0));
                }
                Instruction::Ecrecover => {
                    let prehash = B256::from(self.pop()?);
                    let r = self.pop()?;
                    let s = self.pop()?;
                    let recovered = crypto::recover_address(&prehash, r, s, 0)
                        .or_else(|| crypto::recover_address(&prehash, r, s, 1));
                    self.push(recovered.map(address_to_word).unwrap_or(U256::ZERO));
                }
                Instruction::Address => {
                    let my = ext.my_address();
                    self.push(address_to_word(my));
                }
                Instruction::Origin => {
                    let origin = ext.origin();
                    self.push(address_to_word(origin));
                }
                Instruction::Balance => {
                    self.require(1)?;
                    let address = as_address(self.pop()?);
                    let balance = ext.balance(address)?;
                    self.push(balance);
                }
                Instruction::Caller => {
                    let caller = ext.caller();
                    self.push(address_to_word(caller));
                }
                Instruction::CallValue => {
                    let value = ext.value();
                    self.push(value);
                }
                Instruction::CallDataLoad => {
                    self.require(1)?;
                    let offset = self.pop()?;
                    let data = ext.data();
                    let mut word = [0u8; 32];
                    if let Ok(offset) = usize::try_from(offset) {
                        for (j, byte) in word.iter_mut().enumerate() {
                            if let Some(index) = offset.checked_add(j) {
                                if index < data.len() {
                                    *byte = data[index];
                                }
                            }
                        }
                    }
                    self.push(U256::from_be_bytes(word));
                }
                Instruction::CallDataSize => {
                    let size = ext.data().len();
                    self.push(U256::from(size));
                }
                Instruction::CallDataCopy => {
                    let dest = as_usize(self.pop()?);
                    let src = self.pop()?;
                    let len = as_usize(self.pop()?);
                    copy_padded(&mut self.memory, dest, ext.data(), src, len);
                }
                Instruction::CodeSize => {
                    let size = ext.code().len();
                    self.push(U256::from(size));
                }
                Instruction::CodeCopy => {
                    let dest = as_usize(self.pop()?);
                    let src = self.pop()?;
                    let len = as_usize(self.pop()?);
                    copy_padded(&mut self.memory, dest, ext.code(), src, len);
                }
                Instruction::GasPrice => {
                    let price = ext.gas_price();
                    self.push(price);
                }
                Instruction::PrevHash => {
                    let hash = ext.previous_block().hash;
                    self.push(U256::from_be_bytes(hash.0));
                }
                Instruction::Coinbase => {
                    let coinbase = ext.current_block().coinbase_address;
                    self.push(address_to_word(coinbase));
                }
                Instruction::Timestamp => {
                    let timestamp = ext.current_block().timestamp;
                    self.push(timestamp);
                }
                Instruction::Number => {
                    let number = ext.current_block().number;
                    self.push(number);
                }
                Instruction::Difficulty => {
                    let difficulty = ext.current_block().difficulty;
                    self.push(difficulty);
                }
                Instruction::GasLimit => {
                    let gas_limit = ext.current_block().gas_limit;
                    self.push(gas_limit);
                }
                Instruction::Push1
                | Instruction::Push2
                | Instruction::Push3
                | Instruction::Push4
                | Instruction::Push5
                | Instruction::Push6
                | Instruction::Push7
                | Instruction::Push8
                | Instruction::Push9
                | Instruction::Push10
                | Instruction::Push11
                | Instruction::Push12
                | Instruction::Push13
                | Instruction::Push14
                | Instruction::Push15
                | Instruction::Push16
                | Instruction::Push17
                | Instruction::Push18
                | Instruction::Push19
                | Instruction::Push20
                | Instruction::Push21
                | Instruction::Push22
                | Instruction::Push23
                | Instruction::Push24
                | Instruction::Push25
                | Instruction::Push26
                | Instruction::Push27
                | Instruction::Push28
                | Instruction::Push29
                | Instruction::Push30
                | Instruction::Push31
                | Instruction::Push32 => {
                    let count = inst.push_bytes().unwrap_or(0);
                    let mut value = U256::ZERO;
                    for _ in 0..count {
                        value = (value << 8) | U256::from(ext.code_at(next_pc));
                        next_pc += 1;
                    }
                    self.push(value);
                }
                Instruction::Pop => {
                    self.require(1)?;
                    self.pop()?;
                }
                Instruction::Dup => {
                    self.require(1)?;
                    let top = self.peek(0)?;
                    self.push(top);
                }
                Instruction::Swap => {
                    self.require(2)?;
                    let top = self.pop()?;
                    let second = self.pop()?;
                    self.push(top);
                    self.push(second);
                }
                Instruction::MLoad => {
                    let offset = as_usize(self.pop()?);
                    let mut word = [0u8; 32];
                    word.copy_from_slice(&self.memory[offset..offset + 32]);
                    self.push(U256::from_be_bytes(word));
                }
                Instruction::MStore => {
                    let offset = as_usize(self.pop()?);
                    let word = self.pop()?;
                    self.memory[offset..offset + 32].copy_from_slice(&word.to_be_bytes::<32>());
                }
                Instruction::MStore8 => {
                    let offset = as_usize(self.pop()?);
                    let word = self.pop()?;
                    self.memory[offset] = word.byte(0);
                }
                Instruction::SLoad => {
                    self.require(1)?;
                    let key = self.pop()?;
                    let value = ext.store(key)?;
                    self.push(value);
                }
                Instruction::SStore => {
                    let key = self.pop()?;
                    let value = self.pop()?;
                    ext.set_store(key, value)?;
                }
                Instruction::Jump => {
                    self.require(1)?;
                    next_pc = as_pc(self.pop()?)?;
                }
                Instruction::JumpI => {
                    self.require(2)?;
                    let dest = self.pop()?;
                    let condition = self.pop()?;
                    if !condition.is_zero() {
                        next_pc = as_pc(dest)?;
                    }
                }
                Instruction::Pc => {
                    self.push(U256::from(self.pc));
                }
                Instruction::MemSize => {
                    self.push(U256::from(self.memory.len()));
                }
                Instruction::Gas => {
                    self.push(self.gas);
                }
                Instruction::Create => {
                    let endowment = self.pop()?;
                    let init_offset = as_usize(self.pop()?);
                    let init_size = as_usize(self.pop()?);
                    let my = ext.my_address();
                    // The host moves the endowment inside the creation
                    // frame; only the affordability check lives here.
                    if ext.balance(my)? >= endowment {
                        let init = self.memory[init_offset..init_offset + init_size].to_vec();
                        let created = ext.create(endowment, &mut self.gas, &init)?;
                        self.push(created.map(address_to_word).unwrap_or(U256::ZERO));
                    } else {
                        self.push(U256::ZERO);
                    }
                }
                Instruction::Call => {
                    let mut gas = self.pop()?;
                    let to = as_address(self.pop()?);
                    let value = self.pop()?;
                    let in_offset = as_usize(self.pop()?);
                    let in_size = as_usize(self.pop()?);
                    let out_offset = as_usize(self.pop()?);
                    let out_size = as_usize(self.pop()?);
                    let my = ext.my_address();
                    // The host moves the value inside the callee frame;
                    // only the affordability check lives here.
                    if ext.balance(my)? >= value {
                        let input = self.memory[in_offset..in_offset + in_size].to_vec();
                        let out = &mut self.memory[out_offset..out_offset + out_size];
                        let ok = ext.call(to, value, &input, &mut gas, out)?;
                        self.push(U256::from(ok as u8));
                    } else {
                        self.push(U256::ZERO);
                    }
                    // The callee's unspent budget flows back to this frame.
                    self.gas = self.gas.saturating_add(gas);
                }
                Instruction::Return => {
                    let offset = as_usize(self.pop()?);
                    let size = as_usize(self.pop()?);
                    return Ok(self.memory[offset..offset + size].to_vec());
                }
                Instruction::Suicide => {
                    self.require(1)?;
                    let dest = as_address(self.pop()?);
                    ext.suicide(dest)?;
                    return Ok(Vec::new());
                }
                Instruction::Stop => {
                    return Ok(Vec::new());
                }
            }

            self.pc = next_pc;
        }
    }

    fn require(&self, count: usize) -> Result<(), VmError> {
        if self.stack.len() < count {
            return Err(VmError::StackTooSmall { required: count, have: self.stack.len() });
        }
        Ok(())
    }

    fn push(&mut self, value: U256) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<U256, VmError> {
        self.stack.pop().ok_or(VmError::StackTooSmall { required: 1, have: 0 })
    }

    fn peek(&self, depth: usize) -> Result<U256, VmError> {
        let len = self.stack.len();
        if depth >= len {
            return Err(VmError::StackTooSmall { required: depth + 1, have: len });
        }
        Ok(self.stack[len - 1 - depth])
    }
}

/// Saturating conversion of a memory operand to a size.
fn to_mem(value: U256) -> u128 {
    u128::try_from(value).unwrap_or(u128::MAX)
}

/// Conversion for offsets whose memory span was already charged; anything
/// that survived charging fits comfortably.
fn as_usize(value: U256) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

fn as_pc(value: U256) -> Result<u64, VmError> {
    u64::try_from(value).map_err(|_| VmError::OperandOutOfRange {
        max: u64::MAX as u128,
        got: u128::try_from(value).unwrap_or(u128::MAX),
    })
}

fn as_address(value: U256) -> Address {
    Address::from_word(B256::from(value))
}

fn address_to_word(address: Address) -> U256 {
    U256::from_be_bytes(address.into_word().0)
}

fn signed_div(top: U256, second: U256) -> U256 {
    if second.is_zero() {
        return U256::ZERO;
    }
    let dividend = alloy_primitives::I256::from_raw(top);
    let divisor = alloy_primitives::I256::from_raw(second);
    dividend.wrapping_div(divisor).into_raw()
}

fn signed_rem(top: U256, second: U256) -> U256 {
    if second.is_zero() {
        return U256::ZERO;
    }
    let dividend = alloy_primitives::I256::from_raw(top);
    let divisor = alloy_primitives::I256::from_raw(second);
    dividend.wrapping_rem(divisor).into_raw()
}

/// Copies `len` bytes from `src[src_offset..]` into `memory[dest..]`,
/// zero-filling whatever runs past the end of `src`.
fn copy_padded(memory: &mut [u8], dest: usize, src: &[u8], src_offset: U256, len: usize) {
    let src_offset = usize::try_from(src_offset).unwrap_or(usize::MAX);
    let available = if src_offset >= src.len() { 0 } else { (src.len() - src_offset).min(len) };
    if available > 0 {
        memory[dest..dest + available].copy_from_slice(&src[src_offset..src_offset + available]);
    }
    for byte in &mut memory[dest + available..dest + len] {
        *byte = 0;
    }
}
