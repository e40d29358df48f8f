#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    error!("kernel panic: {}", info);
    loop {
        core::hint::spin_loop();
    }
}
