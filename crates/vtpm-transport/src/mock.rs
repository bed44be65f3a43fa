// SPDX-License-Identifier: Apache-2.0

//! An in-process host for tests
//!
//! [`MockHost`] plays both collaborator roles: it hands out page-aligned memory
//! with a tracked shared attribute and answers service calls with a loopback
//! vTPM that queues sent messages and returns them on receive.

use crate::frame::{Operation, HEADER_LEN};
use crate::host::{parse_command, write_response};
use crate::platform::{Hypercall, SharedMemory};
use crate::PAGE_SIZE;

use std::alloc::{alloc, dealloc, Layout};
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::ptr::NonNull;
use std::slice;

use primordial::Page;
use x86_64::PhysAddr;

/// The shared bit of a guest with a 52-bit guest physical address width
pub const SHARED_BIT: u64 = 1 << 51;

type Tamper = Box<dyn Fn(&mut [u8])>;

/// Arguments of the last service call
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub command: u64,
    pub response: u64,
    pub notify_vector: u64,
    pub timeout_ms: u64,
    /// Both buffers were shared while the host accessed them
    pub shared: bool,
}

struct State {
    allocations: BTreeMap<usize, usize>,
    shared: BTreeMap<usize, usize>,
    allocations_made: usize,
    fail_after: Option<usize>,
    share_error: Option<u64>,
    unshare_error: Option<u64>,

    mask: u64,
    result: (u64, u64),
    service_status: u32,
    message_status: u8,
    tamper: Option<Tamper>,

    mailbox: VecDeque<Vec<u8>>,
    calls: usize,
    last_call: Option<Call>,
    last_command: Vec<u8>,
}

pub struct MockHost {
    state: RefCell<State>,
}

fn layout(pages: usize) -> Layout {
    Layout::array::<Page>(pages).unwrap()
}

impl MockHost {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        Self {
            state: RefCell::new(State {
                allocations: BTreeMap::new(),
                shared: BTreeMap::new(),
                allocations_made: 0,
                fail_after: None,
                share_error: None,
                unshare_error: None,
                mask: SHARED_BIT,
                result: (0, 0),
                service_status: 0,
                message_status: 0,
                tamper: None,
                mailbox: VecDeque::new(),
                calls: 0,
                last_call: None,
                last_command: Vec::new(),
            }),
        }
    }

    /// Fails every allocation after `n` successful ones
    pub fn fail_allocation_after(&self, n: usize) {
        let mut state = self.state.borrow_mut();
        state.fail_after = Some(state.allocations_made + n);
    }

    pub fn reject_share(&self, code: u64) {
        self.state.borrow_mut().share_error = Some(code);
    }

    pub fn reject_unshare(&self, code: u64) {
        self.state.borrow_mut().unshare_error = Some(code);
    }

    pub fn set_mask(&self, mask: u64) {
        self.state.borrow_mut().mask = mask;
    }

    /// Makes every call return the raw `(code, value)` pair without being served
    pub fn set_return(&self, code: u64, value: u64) {
        self.state.borrow_mut().result = (code, value);
    }

    pub fn set_statuses(&self, service: u32, message: u8) {
        let mut state = self.state.borrow_mut();
        state.service_status = service;
        state.message_status = message;
    }

    /// Rewrites every response frame after it was written
    pub fn tamper(&self, f: impl Fn(&mut [u8]) + 'static) {
        self.state.borrow_mut().tamper = Some(Box::new(f));
    }

    /// Queues a message for the next receive
    pub fn push_message(&self, message: &[u8]) {
        self.state.borrow_mut().mailbox.push_back(message.to_vec());
    }

    /// Takes the oldest message delivered by a send
    pub fn pop_message(&self) -> Option<Vec<u8>> {
        self.state.borrow_mut().mailbox.pop_front()
    }

    pub fn live_allocations(&self) -> usize {
        self.state.borrow().allocations.len()
    }

    pub fn allocations_made(&self) -> usize {
        self.state.borrow().allocations_made
    }

    pub fn shared_pages(&self) -> usize {
        self.state.borrow().shared.values().sum()
    }

    pub fn calls(&self) -> usize {
        self.state.borrow().calls
    }

    pub fn last_call(&self) -> Option<Call> {
        self.state.borrow().last_call
    }

    /// The whole command buffer as seen by the last call
    pub fn last_command(&self) -> Vec<u8> {
        self.state.borrow().last_command.clone()
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MockHost {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for (&addr, &pages) in state.allocations.iter() {
            // SAFETY: the allocation was made with the same layout in `allocate_pages`
            unsafe { dealloc(addr as *mut u8, layout(pages)) };
        }
    }
}

unsafe impl SharedMemory for MockHost {
    fn allocate_pages(&self, pages: usize) -> Option<NonNull<u8>> {
        let mut state = self.state.borrow_mut();

        if state.fail_after == Some(state.allocations_made) {
            return None;
        }

        // SAFETY: `pages` is never zero, the transport rejects that earlier
        let base = NonNull::new(unsafe { alloc(layout(pages)) })?;
        // garbage, so tests notice reads of uninitialized bytes
        unsafe { base.as_ptr().write_bytes(0xaa, pages * PAGE_SIZE) };

        state.allocations_made += 1;
        state.allocations.insert(base.as_ptr() as usize, pages);
        Some(base)
    }

    unsafe fn free_pages(&self, base: NonNull<u8>, pages: usize) {
        let mut state = self.state.borrow_mut();
        let addr = base.as_ptr() as usize;

        assert_eq!(state.allocations.remove(&addr), Some(pages));
        assert!(!state.shared.contains_key(&addr), "freed shared pages");

        dealloc(base.as_ptr(), layout(pages));
    }

    unsafe fn set_shared(&self, base: NonNull<u8>, pages: usize) -> Result<(), u64> {
        let mut state = self.state.borrow_mut();
        if let Some(code) = state.share_error {
            return Err(code);
        }

        state.shared.insert(base.as_ptr() as usize, pages);
        Ok(())
    }

    unsafe fn set_private(&self, base: NonNull<u8>, pages: usize) -> Result<(), u64> {
        let mut state = self.state.borrow_mut();
        if let Some(code) = state.unshare_error {
            return Err(code);
        }

        assert_eq!(state.shared.remove(&(base.as_ptr() as usize)), Some(pages));
        Ok(())
    }
}

impl Hypercall for MockHost {
    fn shared_page_mask(&self) -> u64 {
        self.state.borrow().mask
    }

    unsafe fn service(
        &self,
        command: PhysAddr,
        response: PhysAddr,
        notify_vector: u64,
        timeout_ms: u64,
    ) -> (u64, u64) {
        let mut state = self.state.borrow_mut();
        let mask = state.mask;

        let tagged = command.as_u64() & mask != 0 && response.as_u64() & mask != 0;
        let command = (command.as_u64() & !mask) as usize;
        let response = (response.as_u64() & !mask) as usize;

        let shared = tagged
            && state.shared.contains_key(&command)
            && state.shared.contains_key(&response);

        state.calls += 1;
        state.last_call = Some(Call {
            command: command as u64,
            response: response as u64,
            notify_vector,
            timeout_ms,
            shared,
        });

        if state.result != (0, 0) {
            return state.result;
        }

        let (Some(&command_pages), Some(&response_pages)) = (
            state.allocations.get(&command),
            state.allocations.get(&response),
        ) else {
            return (u64::MAX, 0);
        };

        let command = slice::from_raw_parts(command as *const u8, command_pages * PAGE_SIZE);
        let response =
            slice::from_raw_parts_mut(response as *mut u8, response_pages * PAGE_SIZE);

        state.last_command = command.to_vec();

        let request = match parse_command(command) {
            Ok(request) => request,
            Err(_) => return (1, 0),
        };

        let (service_status, message_status) = (state.service_status, state.message_status);

        let written = match request.operation {
            Operation::Send => {
                state.mailbox.push_back(request.payload.to_vec());
                write_response(response, Operation::Send, service_status, message_status, &[])
            }
            Operation::Receive => {
                let message = state.mailbox.pop_front().unwrap_or_default();
                write_response(
                    response,
                    Operation::Receive,
                    service_status,
                    message_status,
                    &message,
                )
            }
        };

        match written {
            Ok(len) => assert!(len >= HEADER_LEN),
            Err(_) => return (1, 0),
        }

        if let Some(tamper) = state.tamper.as_ref() {
            tamper(response);
        }

        (0, 0)
    }
}
