//! Result codes and per-operation error types
use core::{fmt, mem::transmute};

/// The macro to define [`ResultCode`].
macro_rules! define_result_code {
    (
        $( #[$meta:meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident = $vd:expr
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta] )*
                $vname = $vd
            ),*
        }

        impl ResultCode {
            /// Get the short name of the result code.
            ///
            /// # Examples
            ///
            /// ```
            /// use bankos_kernel::ResultCode;
            /// assert_eq!(ResultCode::QueueOverflow.as_str(), "QueueOverflow");
            /// ```
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => stringify!($vname),
                    )*
                }
            }

            fn fmt(self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl fmt::Debug for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                (*self).fmt(f)
            }
        }
    };
}

define_result_code! {
    /// All result codes (including success) that a kernel operation can
    /// produce.
    ///
    /// Every failure is local and recoverable. Nothing in the kernel aborts on
    /// an error condition; the caller is expected to check the returned value.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(i8)]
    pub enum ResultCode {
        /// The operation was successful. No additional information is available.
        Success = 0,
        /// A parameter is invalid in a way that is not covered by any other error
        /// codes.
        BadParam = -17,
        /// The specified task identifier is outside the configured task pool.
        BadId = -18,
        /// The current context disallows the operation, e.g., because CPU Lock
        /// is already active.
        BadContext = -25,
        /// There is not enough free memory to complete the operation.
        NoMemory = -33,
        /// A target object is in a state that disallows the operation.
        BadObjectState = -41,
        /// An item couldn't be enqueued because the queue is full.
        QueueOverflow = -43,
        /// The operation would have to wait for something that isn't available
        /// yet.
        Timeout = -50,
    }
}

impl ResultCode {
    /// Get a flag indicating whether the code represents a failure.
    ///
    /// Failure codes have negative values.
    #[inline]
    pub fn is_err(self) -> bool {
        (self as i8) < 0
    }

    /// Get a flag indicating whether the code represents a success.
    ///
    /// Success codes have non-negative values.
    #[inline]
    pub fn is_ok(self) -> bool {
        !self.is_err()
    }
}

macro_rules! define_error {
    (
        mod $mod_name:ident {}
        $( #[$meta:meta] )*
        $vis:vis enum $name:ident $(: $($subty:ident),* $(,)*)? {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        ///
        /// See [`ResultCode`] for all result codes and generic descriptions.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i8)]
        $vis enum $name {
            $(
                $( #[$vmeta] )*
                // Use the same discriminants as `ResultCode` for cost-free
                // conversion
                $vname = ResultCode::$vname as i8
            ),*
        }

        impl fmt::Debug for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        impl From<Result<(), $name>> for ResultCode {
            #[inline]
            fn from(x: Result<(), $name>) -> Self {
                match x {
                    Ok(()) => Self::Success,
                    Err(e) => Self::from(e),
                }
            }
        }

        impl From<$name> for ResultCode {
            #[inline]
            fn from(x: $name) -> Self {
                // Safety: `ResultCode` and `$name` has the same representation
                //         type, and the representation of `ResultCode` is a
                //         superset of `x`.
                unsafe { transmute(x) }
            }
        }

        #[cfg(test)]
        mod $mod_name {
            use super::*;

            #[test]
            fn to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from($name::$vname),
                    );
                )*
            }

            #[test]
            fn result_to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from(Err($name::$vname)),
                    );
                )*
                assert_eq!(
                    ResultCode::Success,
                    ResultCode::from(Result::<(), $name>::Ok(())),
                );
            }
        }

        $($(
            $subty!(impl From<_> for $name);
        )*)?

        #[allow(unused_macros)]
        macro_rules! $name {
            (impl From<_> for $dest_ty:ty) => {
                impl From<$name> for $dest_ty {
                    #[inline]
                    fn from(x: $name) -> Self {
                        match x {
                            $(
                                $name::$vname => Self::$vname,
                            )*
                        }
                    }
                }
            };
        }
    };
}

// Sub-errors
// ---------------------------------------------------------------------------

define_error! {
    mod bad_context_error {}
    /// `BadContext`. Produced by [`lock_cpu`](crate::Kernel::lock_cpu) when
    /// CPU Lock is already active.
    pub enum BadContextError {
        BadContext,
    }
}

define_error! {
    mod bad_id_error {}
    /// `BadId`
    pub enum BadIdError {
        BadId,
    }
}

define_error! {
    mod bad_param_error {}
    /// `BadParam`
    pub enum BadParamError {
        BadParam,
    }
}

// Operation errors
// ---------------------------------------------------------------------------

define_error! {
    mod new_kernel_error {}
    /// Error type for [`Kernel::new`](crate::Kernel::new).
    pub enum NewKernelError: BadContextError, BadParamError {
        /// CPU Lock is active.
        BadContext,
        /// The configuration is inconsistent, or the heap arena is too small.
        BadParam,
    }
}

define_error! {
    mod configure_task_error {}
    /// Error type for [`Kernel::configure_task`](crate::Kernel::configure_task).
    pub enum ConfigureTaskError: BadContextError, BadIdError {
        /// CPU Lock is active.
        BadContext,
        /// The task ID is outside the configured pool.
        BadId,
    }
}

define_error! {
    mod get_task_error {}
    /// Error type for [`Kernel::task`](crate::Kernel::task).
    pub enum GetTaskError: BadContextError, BadIdError {
        /// CPU Lock is active.
        BadContext,
        /// The task ID is outside the configured pool.
        BadId,
    }
}

define_error! {
    mod alloc_error {}
    /// The result codes of [`Kernel::heap_alloc`](crate::Kernel::heap_alloc).
    /// Converted from [`HeapAllocError`](crate::HeapAllocError).
    pub enum AllocError: BadContextError, BadParamError {
        /// CPU Lock is active.
        BadContext,
        /// The owner tag is the reserved free tag.
        BadParam,
        /// No free block is large enough. The arena was left unmodified.
        NoMemory,
    }
}

define_error! {
    mod free_error {}
    /// Error type for [`Kernel::heap_free`](crate::Kernel::heap_free).
    pub enum FreeError: BadContextError, BadParamError {
        /// CPU Lock is active.
        BadContext,
        /// The offset does not point to the payload of an allocated block.
        BadParam,
    }
}

define_error! {
    mod wait_error {}
    /// Error type for waiter wait operations.
    pub enum WaitError: BadContextError, BadIdError {
        /// CPU Lock is active.
        BadContext,
        /// The task ID is outside the configured pool.
        BadId,
        /// The task is already linked to a wait chain.
        BadObjectState,
    }
}

define_error! {
    mod wake_error {}
    /// Error type for waiter wake operations.
    pub enum WakeError: BadContextError {
        /// CPU Lock is active.
        BadContext,
    }
}

define_error! {
    mod sleep_error {}
    /// Error type for [`Kernel::enqueue_sleep_task`](crate::Kernel::enqueue_sleep_task).
    pub enum SleepError: BadContextError, BadIdError, BadParamError {
        /// CPU Lock is active.
        BadContext,
        /// The task ID is outside the configured pool.
        BadId,
        /// A time delta between adjacent entries would not fit in 16 bits.
        BadParam,
        /// The sleep queue is full.
        QueueOverflow,
    }
}

define_error! {
    mod try_write_tile_error {}
    /// Error type for [`Kernel::try_write_tile`](crate::Kernel::try_write_tile).
    pub enum TryWriteTileError: BadContextError, BadParamError {
        /// CPU Lock is active.
        BadContext,
        /// The destination does not belong to any tile queue.
        BadParam,
        /// The destination queue already holds
        /// [`TILE_QUEUE_CAPACITY`](crate::TILE_QUEUE_CAPACITY) entries.
        QueueOverflow,
    }
}

define_error! {
    mod write_sprite_error {}
    /// Error type for [`Kernel::write_sprite`](crate::Kernel::write_sprite).
    pub enum WriteSpriteError: BadContextError, BadParamError {
        /// CPU Lock is active.
        BadContext,
        /// The sprite index is out of range.
        BadParam,
    }
}

define_error! {
    mod poll_joypad_error {}
    /// Error type for [`Kernel::get_press`](crate::Kernel::get_press).
    pub enum PollJoypadError: BadContextError {
        /// CPU Lock is active.
        BadContext,
        /// No state change is queued.
        Timeout,
    }
}
